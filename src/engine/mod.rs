//! Core engine — the crash-round state machine and its owner task.

pub mod actor;
pub mod crash;
pub mod round;

pub use actor::{spawn_engine, EngineCommand, EngineHandle};
pub use round::{RoundConfig, RoundEngine};
