//! Lookups owned by other services
//!
//! Class scheduling and user identity live outside the financial core; it
//! only needs who teaches a class, the class shape for commission, and
//! whether a user id is real.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::commission::DeliveryMode;
use crate::config::DirectoryConfig;
use crate::core_types::{ClassId, UserId};

/// Outcome of resolving a class's tutor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TutorLookup {
    Found(UserId),
    ClassNotFound,
    /// The class exists but no tutor is assigned yet
    TutorUnresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassShape {
    pub capacity: u32,
    pub mode: DeliveryMode,
}

#[async_trait]
pub trait ClassDirectory: Send + Sync {
    async fn resolve_tutor(&self, class_id: ClassId) -> TutorLookup;

    async fn class_shape(&self, class_id: ClassId) -> Option<ClassShape>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_exists(&self, user_id: UserId) -> bool;
}

/// Class fixture, as loaded from config or registered by tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub class_id: ClassId,
    #[serde(default)]
    pub tutor_user_id: Option<UserId>,
    pub capacity: u32,
    pub mode: DeliveryMode,
}

/// In-process directory
///
/// With `open_users` every positive id counts as an existing user, which is
/// what a deployment without an identity service wants.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    classes: RwLock<HashMap<ClassId, ClassRecord>>,
    users: RwLock<HashSet<UserId>>,
    open_users: bool,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_open_users() -> Self {
        Self {
            open_users: true,
            ..Self::default()
        }
    }

    pub fn from_config(config: &DirectoryConfig) -> Self {
        let dir = Self {
            open_users: config.open_users,
            ..Self::default()
        };
        for record in &config.classes {
            dir.add_class(record.clone());
        }
        dir
    }

    pub fn add_class(&self, record: ClassRecord) -> &Self {
        self.classes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.class_id, record);
        self
    }

    pub fn add_user(&self, user_id: UserId) -> &Self {
        self.users
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id);
        self
    }

    fn class(&self, class_id: ClassId) -> Option<ClassRecord> {
        self.classes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&class_id)
            .cloned()
    }
}

#[async_trait]
impl ClassDirectory for StaticDirectory {
    async fn resolve_tutor(&self, class_id: ClassId) -> TutorLookup {
        match self.class(class_id) {
            None => TutorLookup::ClassNotFound,
            Some(ClassRecord {
                tutor_user_id: Some(tutor),
                ..
            }) => TutorLookup::Found(tutor),
            Some(_) => TutorLookup::TutorUnresolved,
        }
    }

    async fn class_shape(&self, class_id: ClassId) -> Option<ClassShape> {
        self.class(class_id).map(|c| ClassShape {
            capacity: c.capacity,
            mode: c.mode,
        })
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn user_exists(&self, user_id: UserId) -> bool {
        (self.open_users && user_id > 0)
            || self
                .users
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .contains(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_tutor_outcomes() {
        let dir = StaticDirectory::new();
        dir.add_class(ClassRecord {
            class_id: 1,
            tutor_user_id: Some(9),
            capacity: 1,
            mode: DeliveryMode::Online,
        })
        .add_class(ClassRecord {
            class_id: 2,
            tutor_user_id: None,
            capacity: 4,
            mode: DeliveryMode::Offline,
        });

        assert_eq!(dir.resolve_tutor(1).await, TutorLookup::Found(9));
        assert_eq!(dir.resolve_tutor(2).await, TutorLookup::TutorUnresolved);
        assert_eq!(dir.resolve_tutor(3).await, TutorLookup::ClassNotFound);
        assert_eq!(dir.class_shape(2).await.map(|s| s.capacity), Some(4));
    }

    #[tokio::test]
    async fn test_user_exists() {
        let dir = StaticDirectory::new();
        dir.add_user(5);
        assert!(dir.user_exists(5).await);
        assert!(!dir.user_exists(6).await);

        let open = StaticDirectory::with_open_users();
        assert!(open.user_exists(6).await);
        assert!(!open.user_exists(0).await);
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = DirectoryConfig {
            open_users: true,
            classes: vec![ClassRecord {
                class_id: 7,
                tutor_user_id: Some(3),
                capacity: 1,
                mode: DeliveryMode::Online,
            }],
        };
        let dir = StaticDirectory::from_config(&config);
        assert_eq!(dir.resolve_tutor(7).await, TutorLookup::Found(3));
        assert!(dir.user_exists(42).await);
    }
}
