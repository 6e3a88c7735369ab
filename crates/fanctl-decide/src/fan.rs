use fanctl_proto::BoosterState;
use tracing::debug;

use crate::average::RunningAverage;
use crate::DecideError;

/// Averaged temperatures (degrees Celsius) above which the system is hot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FanThresholds {
    cpu_only: f32,
    shared: f32,
}

impl Default for FanThresholds {
    fn default() -> Self {
        Self {
            cpu_only: 91.0,
            shared: 80.0,
        }
    }
}

impl FanThresholds {
    /// `shared` must stay below `cpu_only`: the CPU-only branch is the more
    /// extreme condition.
    pub fn new(cpu_only: f32, shared: f32) -> Result<Self, DecideError> {
        if !(shared < cpu_only) {
            return Err(DecideError::ThresholdOrder { shared, cpu_only });
        }
        Ok(Self { cpu_only, shared })
    }

    pub fn cpu_only(&self) -> f32 {
        self.cpu_only
    }

    pub fn shared(&self) -> f32 {
        self.shared
    }

    /// Hot when the CPU alone is above the CPU-only limit, or both CPU and
    /// GPU are above the shared limit. Missing averages never count as hot.
    pub fn is_hot(&self, cpu_avg: Option<f32>, gpu_avg: Option<f32>) -> bool {
        let above = |avg: Option<f32>, limit: f32| avg.is_some_and(|v| v > limit);
        above(cpu_avg, self.cpu_only) || (above(cpu_avg, self.shared) && above(gpu_avg, self.shared))
    }
}

/// Fan booster hysteresis over `N`-sample temperature averages.
#[derive(Debug, Clone)]
pub struct FanBoosterDecider<const N: usize> {
    thresholds: FanThresholds,
    cpu: RunningAverage<N>,
    gpu: RunningAverage<N>,
}

impl<const N: usize> FanBoosterDecider<N> {
    pub fn new(thresholds: FanThresholds) -> Self {
        Self {
            thresholds,
            cpu: RunningAverage::new(),
            gpu: RunningAverage::new(),
        }
    }

    pub fn offer(&mut self, cpu_temperature: f32, gpu_temperature: f32) {
        self.cpu.offer(cpu_temperature);
        self.gpu.offer(gpu_temperature);
    }

    pub fn is_hot(&self) -> bool {
        self.thresholds.is_hot(self.cpu.current(), self.gpu.current())
    }

    pub fn decide(&self, current: BoosterState) -> BoosterState {
        let hot = self.is_hot();
        let next = match current {
            BoosterState::Off if hot => BoosterState::On,
            BoosterState::On if !hot => BoosterState::Off,
            _ => BoosterState::NoChange,
        };
        if next != BoosterState::NoChange {
            debug!(
                cpu_avg = ?self.cpu.current(),
                gpu_avg = ?self.gpu.current(),
                ?next,
                "fan booster decision"
            );
        }
        next
    }
}
