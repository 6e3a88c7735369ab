use std::time::Instant;

use fanctl_proto::{BoostersStates, FullInfoBlock};
use tracing::trace;

use crate::fan::{FanBoosterDecider, FanThresholds};
use crate::turbo::{CpuTurboBoostController, TurboThresholds};
use crate::DecideError;

/// Combines the fan hysteresis and the turbo decider into one booster delta
/// per daemon snapshot.
#[derive(Debug, Clone)]
pub struct BoostersOnOffDecider<const N: usize> {
    last: BoostersStates,
    last_tag: Option<u64>,
    fan: FanBoosterDecider<N>,
    turbo: CpuTurboBoostController,
}

impl<const N: usize> BoostersOnOffDecider<N> {
    pub fn new(fan: FanThresholds, turbo: TurboThresholds) -> Result<Self, DecideError> {
        Ok(Self {
            last: BoostersStates::default(),
            last_tag: None,
            fan: FanBoosterDecider::new(fan),
            turbo: CpuTurboBoostController::new(turbo)?,
        })
    }

    pub fn compute(&mut self, snapshot: Option<&FullInfoBlock>) -> Result<BoostersStates, DecideError> {
        self.compute_at(snapshot, Instant::now())
    }

    /// Feed the latest snapshot (if any) and return the states to request.
    ///
    /// A snapshot whose tag did not advance is treated as "nothing new": the
    /// fan decision is repeated from the stored averages and turbo is left
    /// alone.
    pub fn compute_at(
        &mut self,
        snapshot: Option<&FullInfoBlock>,
        at: Instant,
    ) -> Result<BoostersStates, DecideError> {
        let mut out = BoostersStates::default();
        let fresh = snapshot.filter(|s| self.last_tag.map_or(true, |tag| s.tag > tag));
        if let Some(info) = fresh {
            let cpu = f32::from(info.info.cpu.temperature);
            let gpu = f32::from(info.info.gpu.temperature);
            self.fan.offer(cpu, gpu);
            out.cpu_turbo = self.turbo.update_at(cpu, info.boosters.cpu_turbo, at)?;
            self.last = info.boosters;
            self.last_tag = Some(info.tag);
            trace!(tag = info.tag, cpu, gpu, "decider fed");
        }
        out.fan_booster = self.fan.decide(self.last.fan_booster);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanctl_proto::{BoosterState, CpuTurboBoostState, Info};
    use std::time::Duration;

    fn snapshot(tag: u64, cpu: u16, gpu: u16, fan: BoosterState) -> FullInfoBlock {
        let mut block = FullInfoBlock {
            tag,
            ..FullInfoBlock::default()
        };
        block.info.cpu = Info {
            temperature: cpu,
            fan_rpm: 3000,
        };
        block.info.gpu = Info {
            temperature: gpu,
            fan_rpm: 0,
        };
        block.boosters.fan_booster = fan;
        block.boosters.cpu_turbo = CpuTurboBoostState::Off;
        block
    }

    #[test]
    fn hot_snapshots_turn_booster_on() {
        let mut decider =
            BoostersOnOffDecider::<3>::new(FanThresholds::default(), TurboThresholds::default())
                .expect("decider");
        let start = Instant::now();
        let mut last = BoostersStates::default();
        for tag in 1..=3 {
            let at = start + Duration::from_secs(tag);
            let block = snapshot(tag, 85, 85, BoosterState::Off);
            last = decider.compute_at(Some(&block), at).expect("compute");
        }
        assert_eq!(last.fan_booster, BoosterState::On);
        assert!(last.has_any_change());
    }

    #[test]
    fn stale_snapshot_is_not_sampled_twice() {
        let mut decider =
            BoostersOnOffDecider::<2>::new(FanThresholds::default(), TurboThresholds::default())
                .expect("decider");
        let block = snapshot(5, 95, 0, BoosterState::Off);
        let at = Instant::now();
        decider.compute_at(Some(&block), at).expect("compute");
        // Same tag and same instant: would be a clock regression if sampled.
        let out = decider.compute_at(Some(&block), at).expect("compute");
        assert_eq!(out.fan_booster, BoosterState::NoChange);
        assert_eq!(out.cpu_turbo, CpuTurboBoostState::NoChange);
    }

    #[test]
    fn no_snapshot_means_no_change() {
        let mut decider =
            BoostersOnOffDecider::<3>::new(FanThresholds::default(), TurboThresholds::default())
                .expect("decider");
        let out = decider.compute(None).expect("compute");
        assert!(!out.has_any_change());
    }
}
