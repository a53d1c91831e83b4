//! Ralph loop: keep an agent iterating on one prompt until its work verifiably
//! passes or a circuit breaker trips.

mod controller;
pub mod guards;
mod signals;
mod state;
pub mod transcript;
pub mod validation;

pub use controller::{LoopController, LoopError, LoopStatus, StopDecision, StopInput, StopKind};
pub use guards::{Breaker, IterationRecord, Trip};
pub use signals::{Evidence, KeywordDetector, SignalDetector};
pub use state::{LoopSource, LoopState, LoopStore};
pub use validation::{CommandValidator, ValidationReport, Validator};
