use std::time::Instant;

use fanctl_proto::CpuTurboBoostState;
use tracing::debug;

use crate::derivative::TabularDerivative;
use crate::DecideError;

/// Temperature cutoffs of the turbo decider, degrees Celsius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurboThresholds {
    /// Turbo may be switched off at or above this temperature.
    pub hot: f32,
    /// Turbo may be switched back on at or below this temperature.
    pub cold: f32,
    /// Heating faster than this (degrees per second) counts as "too fast".
    pub fast_heating_rate: f32,
    /// Smoothing of the temperature rate.
    pub rate_alpha: f32,
    /// Smoothing of the temperature acceleration.
    pub acceleration_alpha: f32,
}

impl Default for TurboThresholds {
    fn default() -> Self {
        Self {
            hot: 83.0,
            cold: 72.0,
            fast_heating_rate: 0.5,
            rate_alpha: 0.3,
            acceleration_alpha: 0.5,
        }
    }
}

impl TurboThresholds {
    /// Checks that every cutoff is finite and that `cold` lies below `hot`.
    pub fn validate(&self) -> Result<(), DecideError> {
        let cutoffs = [
            ("hot", self.hot),
            ("cold", self.cold),
            ("fast heating rate", self.fast_heating_rate),
        ];
        for (name, value) in cutoffs {
            if !value.is_finite() {
                return Err(DecideError::NonFiniteThreshold { name, value });
            }
        }
        if !(self.cold < self.hot) {
            return Err(DecideError::TurboThresholdOrder {
                hot: self.hot,
                cold: self.cold,
            });
        }
        Ok(())
    }
}

/// Switches CPU turbo boost from the temperature trend.
///
/// The rate is the smoothed derivative of the temperature, the acceleration
/// is the smoothed derivative of that rate.
#[derive(Debug, Clone)]
pub struct CpuTurboBoostController {
    thresholds: TurboThresholds,
    rate: TabularDerivative,
    acceleration: TabularDerivative,
}

impl CpuTurboBoostController {
    pub fn new(thresholds: TurboThresholds) -> Result<Self, DecideError> {
        thresholds.validate()?;
        Ok(Self {
            thresholds,
            rate: TabularDerivative::new(thresholds.rate_alpha)?,
            acceleration: TabularDerivative::new(thresholds.acceleration_alpha)?,
        })
    }

    pub fn thresholds(&self) -> &TurboThresholds {
        &self.thresholds
    }

    pub fn update(&mut self, temperature: f32, current: CpuTurboBoostState) -> Result<CpuTurboBoostState, DecideError> {
        self.update_at(temperature, current, Instant::now())
    }

    pub fn update_at(
        &mut self,
        temperature: f32,
        current: CpuTurboBoostState,
        at: Instant,
    ) -> Result<CpuTurboBoostState, DecideError> {
        let t = self.thresholds;
        // Attached while already hot: act without waiting for history.
        let without_history = if current == CpuTurboBoostState::On && temperature >= t.hot {
            CpuTurboBoostState::Off
        } else {
            CpuTurboBoostState::NoChange
        };

        let Some(rate) = self.rate.update_at(temperature, at)? else {
            return Ok(without_history);
        };
        let Some(acceleration) = self.acceleration.update_at(rate, at)? else {
            return Ok(without_history);
        };

        let next = match current {
            CpuTurboBoostState::On
                if temperature >= t.hot && rate > t.fast_heating_rate && acceleration >= 0.0 =>
            {
                CpuTurboBoostState::Off
            }
            CpuTurboBoostState::Off
                if temperature <= t.cold && rate <= 0.0 && acceleration <= 0.0 =>
            {
                CpuTurboBoostState::On
            }
            _ => CpuTurboBoostState::NoChange,
        };
        if next != CpuTurboBoostState::NoChange {
            debug!(temperature, rate, acceleration, ?next, "turbo decision");
        }
        Ok(next)
    }
}
