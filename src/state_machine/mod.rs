mod job;
mod machine;
mod stage;

pub use job::{Change, JobPatch, JobRecord, StageEvent};
#[cfg(test)]
pub use machine::IgnoreReason;
pub use machine::{FollowUp, Route, StageMachine};
pub use stage::{Stage, Worker};
