use std::time::{Duration, Instant};

use fanctl_decide::{BoostersOnOffDecider, FanThresholds, TurboThresholds};
use fanctl_proto::{BoosterState, CpuTurboBoostState, FullInfoBlock};

/// CPU and GPU temperatures sampled once per second during a game session.
const TRACE: &[(u16, u16)] = &[
    (55, 48), (61, 52), (70, 60), (78, 70), (84, 79), (88, 82), (92, 84), (93, 85),
    (94, 85), (90, 83), (84, 80), (77, 74), (71, 66), (66, 60), (62, 55), (58, 50),
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let mut decider = BoostersOnOffDecider::<3>::new(FanThresholds::default(), TurboThresholds::default())?;
    let start = Instant::now();
    let mut current = FullInfoBlock::default();
    current.boosters.fan_booster = BoosterState::Off;
    current.boosters.cpu_turbo = CpuTurboBoostState::On;

    println!("{:>4} {:>5} {:>5} {:>8} {:>8}", "SEC", "CPU", "GPU", "FAN", "TURBO");
    for (second, &(cpu, gpu)) in TRACE.iter().enumerate() {
        current.tag += 1;
        current.info.cpu.temperature = cpu;
        current.info.gpu.temperature = gpu;
        let at = start + Duration::from_secs(second as u64);
        let delta = decider.compute_at(Some(&current), at)?;
        // Pretend the daemon applied the delta before the next sample.
        if delta.fan_booster != BoosterState::NoChange {
            current.boosters.fan_booster = delta.fan_booster;
        }
        if delta.cpu_turbo != CpuTurboBoostState::NoChange {
            current.boosters.cpu_turbo = delta.cpu_turbo;
        }
        println!(
            "{second:>4} {cpu:>5} {gpu:>5} {:>8} {:>8}",
            format!("{:?}", current.boosters.fan_booster),
            format!("{:?}", current.boosters.cpu_turbo),
        );
    }
    Ok(())
}
