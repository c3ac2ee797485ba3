// Position lifecycle and order journaling
pub mod journal;
pub mod position_manager;

pub use journal::OrderJournal;
pub use position_manager::{
    EvaluateOutcome, ExitReason, MonitorOutcome, Position, PositionManager, PositionState,
};
