//! Per-user setup bookkeeping.

use std::collections::{HashMap, HashSet};

use strum::Display;

/// How far a user's mounts have been set up. Only moves forward until
/// teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SetupStage {
    #[default]
    NotStarted,
    /// Home mount attached, builtin wrappers registered.
    OneTimeDone,
    /// Some providers or paths set up.
    Partial,
    /// Every provider ran.
    Full,
}

/// Depth to which a path's mounts are known to be attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SetupLevel {
    #[default]
    None,
    WithoutChildren,
    WithChildren,
}

#[derive(Debug, Clone, Default)]
pub struct UserSetupState {
    pub stage: SetupStage,
    /// Provider tags that ran for this user.
    pub providers_run: HashSet<String>,
    pub path_levels: HashMap<String, SetupLevel>,
    /// Prefixes attached through partial providers; dropped before a full
    /// setup so they are not duplicated.
    pub partial_mounts: Vec<String>,
    /// Memoized answer of the setup cache for this state's lifetime.
    pub full_setup_required: Option<bool>,
}

impl UserSetupState {
    pub fn is_started(&self) -> bool {
        self.stage >= SetupStage::OneTimeDone
    }

    pub fn is_complete(&self) -> bool {
        self.stage == SetupStage::Full
    }

    /// Move forward to `stage`; never backwards.
    pub fn advance(&mut self, stage: SetupStage) {
        if stage > self.stage {
            self.stage = stage;
        }
    }

    pub fn provider_ran(&self, provider: &str) -> bool {
        self.providers_run.contains(provider)
    }

    /// A path is set up when it, or an ancestor set up with children,
    /// was recorded at a sufficient level.
    pub fn is_path_setup(&self, path: &str, include_children: bool) -> bool {
        let needed = if include_children {
            SetupLevel::WithChildren
        } else {
            SetupLevel::WithoutChildren
        };
        if self.path_levels.get(path).is_some_and(|level| *level >= needed) {
            return true;
        }
        let mut current = path;
        while let Some(idx) = current.rfind('/') {
            current = &current[..idx];
            let key = if current.is_empty() { "/" } else { current };
            if self.path_levels.get(key) == Some(&SetupLevel::WithChildren) {
                return true;
            }
        }
        false
    }

    pub fn mark_path(&mut self, path: &str, include_children: bool) {
        let level = if include_children {
            SetupLevel::WithChildren
        } else {
            SetupLevel::WithoutChildren
        };
        let entry = self.path_levels.entry(path.to_string()).or_default();
        if level > *entry {
            *entry = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_only_advances() {
        let mut state = UserSetupState::default();
        state.advance(SetupStage::Full);
        state.advance(SetupStage::Partial);
        assert!(state.is_complete());
        assert!(state.is_started());
    }

    #[test]
    fn test_path_levels() {
        let mut state = UserSetupState::default();
        state.mark_path("/u/files/a", false);
        assert!(state.is_path_setup("/u/files/a", false));
        assert!(!state.is_path_setup("/u/files/a", true));
        assert!(!state.is_path_setup("/u/files/a/b", false));

        state.mark_path("/u/files", true);
        assert!(state.is_path_setup("/u/files/a", true));
        assert!(state.is_path_setup("/u/files/x/y", false));
        assert!(!state.is_path_setup("/u", false));

        // a weaker mark does not downgrade
        state.mark_path("/u/files", false);
        assert!(state.is_path_setup("/u/files", true));
    }
}
