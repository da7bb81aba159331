pub mod plan;
pub mod sweeper;
pub mod worker;

pub use plan::{OrphanPlan, plan_orphans};
pub use sweeper::{ReconciliationSweeper, SweepOutcome, SweepReport};
pub use worker::{SweepWorker, spawn_sweep_worker};
