//! 对话编排：Turn Controller 状态机、质量门、过程事件

pub mod controller;
pub mod events;
pub mod quality;

pub use controller::{RunStats, Termination, TurnEngine, TurnOutcome};
pub use events::{TurnEvent, TurnPhase};
pub use quality::{QualityGate, QualityVerdict, VerdictLabel};
