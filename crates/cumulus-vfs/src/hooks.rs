//! Typed hook bus.
//!
//! Filesystem operations publish [`HookEvent`]s synchronously. Listeners
//! subscribe with NATS-style subject patterns and may veto the cancellable
//! pre-signals (`file.write`, `move.rename`, ...) by returning
//! [`HookDecision::Veto`].
//!
//! # Subjects
//!
//! ```text
//! file.create  file.post_create  file.write   file.post_write
//! file.update  file.post_update  file.delete  file.post_delete
//! file.read    file.touch        file.post_touch
//! move.rename  move.post_rename  move.copy    move.post_copy
//! mount.umount mount.post_umount
//! lifecycle.pre_setup lifecycle.post_init_mount_points
//! lifecycle.setup     lifecycle.torn_down
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use strum::{Display, EnumString};

/// Match a dotted subject against a pattern.
///
/// `*` matches exactly one token, `>` matches one or more trailing tokens.
///
/// ```
/// use cumulus_vfs::hooks::matches_pattern;
///
/// assert!(matches_pattern("file.*", "file.post_write"));
/// assert!(matches_pattern(">", "move.rename"));
/// assert!(!matches_pattern("file.*", "move.rename"));
/// ```
pub fn matches_pattern(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.').peekable();
    let mut subject_tokens = subject.split('.');

    while let Some(p) = pattern_tokens.next() {
        match (p, subject_tokens.next()) {
            (">", Some(_)) => return pattern_tokens.peek().is_none(),
            ("*", Some(_)) => {}
            (token, Some(s)) if token == s => {}
            _ => return false,
        }
    }

    subject_tokens.next().is_none()
}

// ============================================================================
// Events
// ============================================================================

/// Single-path file signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum FileSignal {
    Create,
    PostCreate,
    Write,
    PostWrite,
    Update,
    PostUpdate,
    Delete,
    PostDelete,
    Read,
    Touch,
    PostTouch,
}

impl FileSignal {
    /// The post-signal paired with a pre-signal.
    pub fn post(self) -> Option<Self> {
        match self {
            Self::Create => Some(Self::PostCreate),
            Self::Write => Some(Self::PostWrite),
            Self::Update => Some(Self::PostUpdate),
            Self::Delete => Some(Self::PostDelete),
            Self::Touch => Some(Self::PostTouch),
            _ => None,
        }
    }
}

/// Two-path signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MoveSignal {
    Rename,
    PostRename,
    Copy,
    PostCopy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MountSignal {
    Umount,
    PostUmount,
}

/// Setup lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    PreSetup { user: String },
    PostInitMountPoints { user: String },
    Setup { user: String, user_dir: String },
    TornDown,
}

impl LifecycleEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::PreSetup { .. } => "pre_setup",
            Self::PostInitMountPoints { .. } => "post_init_mount_points",
            Self::Setup { .. } => "setup",
            Self::TornDown => "torn_down",
        }
    }
}

/// Event published on the bus. Paths are relative to the default view root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    File { signal: FileSignal, path: String },
    Move { signal: MoveSignal, old_path: String, new_path: String },
    Mount { signal: MountSignal, path: String },
    Lifecycle(LifecycleEvent),
}

impl HookEvent {
    pub fn file(signal: FileSignal, path: impl Into<String>) -> Self {
        Self::File {
            signal,
            path: path.into(),
        }
    }

    pub fn moved(signal: MoveSignal, old_path: impl Into<String>, new_path: impl Into<String>) -> Self {
        Self::Move {
            signal,
            old_path: old_path.into(),
            new_path: new_path.into(),
        }
    }

    /// Dotted subject used for pattern matching.
    pub fn subject(&self) -> String {
        match self {
            Self::File { signal, .. } => format!("file.{}", signal),
            Self::Move { signal, .. } => format!("move.{}", signal),
            Self::Mount { signal, .. } => format!("mount.{}", signal),
            Self::Lifecycle(ev) => format!("lifecycle.{}", ev.name()),
        }
    }

    /// Whether a listener can cancel the operation.
    pub fn is_vetoable(&self) -> bool {
        match self {
            Self::File { signal, .. } => matches!(
                signal,
                FileSignal::Create
                    | FileSignal::Write
                    | FileSignal::Update
                    | FileSignal::Delete
                    | FileSignal::Touch
            ),
            Self::Move { signal, .. } => matches!(signal, MoveSignal::Rename | MoveSignal::Copy),
            Self::Mount { signal, .. } => *signal == MountSignal::Umount,
            Self::Lifecycle(_) => false,
        }
    }
}

// ============================================================================
// Bus
// ============================================================================

/// Listener verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookDecision {
    #[default]
    Continue,
    Veto,
}

pub trait HookListener: Send + Sync {
    fn handle(&self, event: &HookEvent) -> HookDecision;
}

impl<F> HookListener for F
where
    F: Fn(&HookEvent) -> HookDecision + Send + Sync,
{
    fn handle(&self, event: &HookEvent) -> HookDecision {
        self(event)
    }
}

/// Handle returned by [`HookBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    pattern: String,
    listener: Arc<dyn HookListener>,
}

/// Synchronous publish/subscribe bus.
#[derive(Default)]
pub struct HookBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for HookBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookBus")
            .field("subscriptions", &self.subscriptions.read().len())
            .finish()
    }
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, pattern: impl Into<String>, listener: impl HookListener + 'static) -> SubscriptionId {
        self.subscribe_arc(pattern, Arc::new(listener))
    }

    pub fn subscribe_arc(&self, pattern: impl Into<String>, listener: Arc<dyn HookListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().push(Subscription {
            id,
            pattern: pattern.into(),
            listener,
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Deliver to every matching listener.
    ///
    /// Returns `Veto` if any listener vetoed a vetoable event. All listeners
    /// run regardless; a veto does not short-circuit delivery.
    pub fn emit(&self, event: &HookEvent) -> HookDecision {
        let subject = event.subject();
        let listeners: Vec<Arc<dyn HookListener>> = self
            .subscriptions
            .read()
            .iter()
            .filter(|s| matches_pattern(&s.pattern, &subject))
            .map(|s| Arc::clone(&s.listener))
            .collect();

        let mut decision = HookDecision::Continue;
        for listener in listeners {
            if listener.handle(event) == HookDecision::Veto && event.is_vetoable() {
                tracing::debug!(subject = %subject, "hook vetoed operation");
                decision = HookDecision::Veto;
            }
        }
        decision
    }
}
