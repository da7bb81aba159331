pub mod error;
pub mod types;

pub use error::{LinkError, Result};
pub use types::{
    Account, DeleteNotification, DeletionEvent, EntityId, LinkProjection, Profile, Role, StoreKind,
    normalize_email,
};
