pub mod coordinator;
pub mod hooks;

pub use coordinator::{CascadeCoordinator, CascadeOrigin, CascadeOutcome};
pub use hooks::{HookedDeleteOutcome, HookedDeletes};
