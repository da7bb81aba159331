pub mod manager;

pub use manager::{EngineHealth, LifecycleManager};
