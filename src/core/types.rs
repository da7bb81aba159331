use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-generated record identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Emails compare case-insensitively; every stored and queried email goes
/// through this first.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn non_empty_email(email: Option<&str>) -> Option<String> {
    email.map(normalize_email).filter(|e| !e.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    #[default]
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Student => f.write_str("student"),
            Role::Admin => f.write_str("admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Which of the two linked collections a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Accounts,
    Profiles,
}

impl StoreKind {
    /// The collection holding this kind's counterparts.
    pub fn other(self) -> Self {
        match self {
            StoreKind::Accounts => StoreKind::Profiles,
            StoreKind::Profiles => StoreKind::Accounts,
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Accounts => f.write_str("accounts"),
            StoreKind::Profiles => f.write_str("profiles"),
        }
    }
}

/// Identity/credential record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: EntityId,
    pub email: String,
    pub role: Role,
    pub display_name: String,
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(email: &str, role: Role) -> Self {
        Self {
            id: EntityId::generate(),
            email: normalize_email(email),
            role,
            display_name: String::new(),
            password_hash: String::new(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = name.trim().to_string();
        self
    }

    pub fn link_projection(&self) -> LinkProjection {
        LinkProjection {
            id: self.id.clone(),
            linked_id: None,
            email: self.email.clone(),
            role: Some(self.role),
        }
    }
}

/// Domain record that depends on an [`Account`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: EntityId,
    pub email: String,
    pub account_id: Option<EntityId>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(email: &str) -> Self {
        Self {
            id: EntityId::generate(),
            email: normalize_email(email),
            account_id: None,
            payload: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn linked_to(mut self, account_id: &EntityId) -> Self {
        self.account_id = Some(account_id.clone());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn link_projection(&self) -> LinkProjection {
        LinkProjection {
            id: self.id.clone(),
            linked_id: self.account_id.clone(),
            email: self.email.clone(),
            role: None,
        }
    }
}

/// Key/link-field projection of a record. This is all the engine ever reads.
///
/// `linked_id` is a Profile's `accountId`; Accounts leave it empty. `role` is
/// only set for Accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkProjection {
    pub id: EntityId,
    pub linked_id: Option<EntityId>,
    pub email: String,
    pub role: Option<Role>,
}

/// A delete as delivered by a store's change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteNotification {
    pub store: StoreKind,
    pub id: EntityId,
    /// The record as it existed right before the delete, when the
    /// subscription asked for it.
    pub pre_image: Option<LinkProjection>,
    pub deleted_at: DateTime<Utc>,
}

/// One deletion in either store, with whatever linkage is still known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionEvent {
    pub store: StoreKind,
    pub id: EntityId,
    pub email: Option<String>,
    pub linked_id: Option<EntityId>,
}

impl DeletionEvent {
    pub fn account(id: EntityId, email: Option<&str>) -> Self {
        Self {
            store: StoreKind::Accounts,
            id,
            email: non_empty_email(email),
            linked_id: None,
        }
    }

    pub fn profile(id: EntityId, linked_id: Option<EntityId>, email: Option<&str>) -> Self {
        Self {
            store: StoreKind::Profiles,
            id,
            email: non_empty_email(email),
            linked_id,
        }
    }

    pub fn from_projection(store: StoreKind, projection: &LinkProjection) -> Self {
        match store {
            StoreKind::Accounts => {
                Self::account(projection.id.clone(), Some(projection.email.as_str()))
            }
            StoreKind::Profiles => Self::profile(
                projection.id.clone(),
                projection.linked_id.clone(),
                Some(projection.email.as_str()),
            ),
        }
    }

    pub fn from_notification(notification: &DeleteNotification) -> Self {
        match &notification.pre_image {
            Some(pre_image) => Self::from_projection(notification.store, pre_image),
            None => Self {
                store: notification.store,
                id: notification.id.clone(),
                email: None,
                linked_id: None,
            },
        }
    }

    /// False when nothing is left to match counterparts on.
    pub fn has_linkage(&self) -> bool {
        match self.store {
            StoreKind::Accounts => true,
            StoreKind::Profiles => self.linked_id.is_some() || self.email.is_some(),
        }
    }
}
