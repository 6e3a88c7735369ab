//! Decision algorithms run by the UI session ("game mode").
//!
//! All deciders are pure state machines fed with daemon snapshots; they emit
//! `NoChange` unless a transition is warranted, so their output can be merged
//! straight into the next outgoing request.

use thiserror::Error;

mod average;
mod boosters;
mod derivative;
mod fan;
mod poll;
mod turbo;

pub use average::RunningAverage;
pub use boosters::BoostersOnOffDecider;
pub use derivative::TabularDerivative;
pub use fan::{FanBoosterDecider, FanThresholds};
pub use poll::{PollScheduler, PollStep};
pub use turbo::{CpuTurboBoostController, TurboThresholds};

/// Invariant violations of the decision layer. None of them is retried.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecideError {
    #[error("non-positive time step ({dt_secs} s) between samples: clock went backwards")]
    ClockRegression { dt_secs: f64 },
    #[error("shared threshold {shared} must be below cpu-only threshold {cpu_only}")]
    ThresholdOrder { shared: f32, cpu_only: f32 },
    #[error("turbo cold threshold {cold} must be below hot threshold {hot}")]
    TurboThresholdOrder { hot: f32, cold: f32 },
    #[error("{name} threshold is not finite ({value})")]
    NonFiniteThreshold { name: &'static str, value: f32 },
    #[error("poll table must be sorted by temperature (entry {index})")]
    UnsortedPollTable { index: usize },
    #[error("poll table entry {index} has a zero divisor")]
    ZeroDivisor { index: usize },
    #[error("poll table is empty")]
    EmptyPollTable,
    #[error("smoothing factor {0} outside of (0, 1]")]
    Alpha(f32),
}
