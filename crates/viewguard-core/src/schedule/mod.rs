//! Schedule evaluation.
//!
//! [`evaluate`] is a pure function of the settings snapshot, the device id
//! and an injected "now". It performs no I/O and never reads the wall clock.

mod evaluator;

pub use evaluator::{evaluate, ScheduleReason, ScheduleResult};
