//! Minimal user directory the setup manager resolves ids against.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
}

impl User {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.uid)
    }

    /// `/<uid>/files`
    pub fn files_root(&self) -> String {
        format!("/{}/files", self.uid)
    }
}

pub trait UserManager: Send + Sync {
    fn get(&self, uid: &str) -> Option<User>;

    fn user_exists(&self, uid: &str) -> bool {
        self.get(uid).is_some()
    }
}

#[derive(Debug, Default)]
pub struct MemoryUserManager {
    users: DashMap<String, User>,
}

impl MemoryUserManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users<I, S>(uids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let manager = Self::new();
        for uid in uids {
            manager.add(User::new(uid));
        }
        manager
    }

    pub fn add(&self, user: User) {
        self.users.insert(user.uid().to_string(), user);
    }

    pub fn remove(&self, uid: &str) -> Option<User> {
        self.users.remove(uid).map(|(_, u)| u)
    }
}

impl UserManager for MemoryUserManager {
    fn get(&self, uid: &str) -> Option<User> {
        self.users.get(uid).map(|u| u.clone())
    }
}
