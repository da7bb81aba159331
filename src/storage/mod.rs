pub mod engine;
pub mod filter;
pub mod memory;

pub use engine::{DeleteFeed, DeleteFilter, EntityStore, SubscribeOptions};
pub use filter::{LinkFilter, LinkMatch};
pub use memory::{FeedCapabilities, InMemoryEntityStore, StoredEntity};
