use std::fmt;

use ec_cmd::{AddressedCommand, StateMap};
use ec_io::{RegisterTransport, TurboBoostFlag};
use fanctl_proto::{
    rpm_from_tach, rpm_is_plausible, BehaveState, BehaveWithCurve, Battery, BoosterState,
    BoostersStates, CpuGpuFanCurve, CpuGpuInfo, CpuTurboBoostState, FullInfoBlock, Info,
};
use tracing::{debug, info, warn};

use crate::detector::ProperCommandDetector;
use crate::table::CommandTable;
use crate::DeviceError;

/// Logical operations on one laptop, independent of its generation.
///
/// Commands with several candidate registers are detected lazily, once, on
/// first use.
pub struct DeviceController {
    table: Box<dyn CommandTable>,
    transport: RegisterTransport,
    turbo: TurboBoostFlag,
    cpu_tach: ProperCommandDetector<AddressedCommand>,
    battery: ProperCommandDetector<AddressedCommand>,
}

impl fmt::Debug for DeviceController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceController")
            .field("table", &self.table.name())
            .field("resource", self.transport.resource())
            .field("turbo", &self.turbo)
            .field("cpu_tach", &self.cpu_tach)
            .field("battery", &self.battery)
            .finish()
    }
}

impl DeviceController {
    pub fn new(table: Box<dyn CommandTable>, transport: RegisterTransport, turbo: TurboBoostFlag) -> Self {
        info!(table = table.name(), resource = %transport.resource().path().display(), "device controller ready");
        Self {
            cpu_tach: ProperCommandDetector::new(table.cpu_tach_candidates()),
            battery: ProperCommandDetector::new(table.battery_candidates()),
            table,
            transport,
            turbo,
        }
    }

    pub fn table(&self) -> &dyn CommandTable {
        self.table.as_ref()
    }

    pub fn transport(&self) -> &RegisterTransport {
        &self.transport
    }

    /// Temperatures and fan speeds of both zones.
    pub fn read_info(&mut self) -> Result<CpuGpuInfo, DeviceError> {
        let cpu_tach = self.cpu_tach_command()?;
        let mut cmds = [
            self.table.cpu_temperature(),
            cpu_tach,
            self.table.gpu_temperature(),
            self.table.gpu_tach(),
        ];
        self.transport.read(&mut cmds)?;
        let info = CpuGpuInfo {
            cpu: zone_info(&cmds[0], &cmds[1]),
            gpu: zone_info(&cmds[2], &cmds[3]),
        };
        if !info.cpu.is_plausible() || !info.gpu.is_plausible() {
            warn!(cpu = ?info.cpu, gpu = ?info.gpu, "implausible sensor readings");
        }
        Ok(info)
    }

    pub fn read_boosters_states(&self) -> Result<BoostersStates, DeviceError> {
        let fan_booster = match self.read_state(self.table.booster_states())? {
            // The "off" encoding no longer matches the register: booster is on.
            Some(BoosterState::Off) => BoosterState::On,
            Some(BoosterState::On) => BoosterState::Off,
            _ => return Err(DeviceError::UnexpectedState("booster")),
        };
        let cpu_turbo = if self.turbo.is_enabled()? {
            CpuTurboBoostState::On
        } else {
            CpuTurboBoostState::Off
        };
        Ok(BoostersStates {
            fan_booster,
            cpu_turbo,
        })
    }

    /// Apply both boosters. The fan booster and the turbo flag are set
    /// independently; the call succeeds when at least one of them did.
    pub fn set_boosters(&self, states: BoostersStates) -> Result<(), DeviceError> {
        let fan = self.set_fan_booster(states.fan_booster);
        let turbo = self.set_turbo(states.cpu_turbo);
        match (fan, turbo) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) | (Ok(()), Err(e)) if !e.is_fatal() => {
                warn!(error = %e, "boosters applied partially");
                Ok(())
            }
            (Err(e), other) => {
                if let Err(turbo_err) = other {
                    warn!(error = %turbo_err, "turbo flag update failed");
                }
                Err(e)
            }
            (Ok(()), Err(e)) => Err(e),
        }
    }

    /// Current fan mode together with the curves found in the registers.
    pub fn read_behave_state(&self) -> Result<BehaveWithCurve, DeviceError> {
        let behave = match self.read_state(self.table.behave_states())? {
            Some(BehaveState::Auto) => BehaveState::Advanced,
            Some(BehaveState::Advanced) => BehaveState::Auto,
            _ => return Err(DeviceError::UnexpectedState("behave")),
        };
        let mut curve = CpuGpuFanCurve::default();
        self.transport.read(&mut curve.cpu)?;
        self.transport.read(&mut curve.gpu)?;
        Ok(BehaveWithCurve { behave, curve })
    }

    /// Validate the curves, then write booster off, CPU curve, GPU curve and
    /// the behave command through one write session.
    pub fn set_behave_state(&self, target: &BehaveWithCurve) -> Result<(), DeviceError> {
        target.curve.validate()?;
        let booster_off = state_command(&self.table.booster_states(), BoosterState::Off)?;
        let behave = state_command(&self.table.behave_states(), target.behave)?;

        let mut handle = self.transport.start_writing()?;
        self.transport.write(&mut handle, &[booster_off])?;
        self.transport.write(&mut handle, &target.curve.cpu)?;
        self.transport.write(&mut handle, &target.curve.gpu)?;
        self.transport.write(&mut handle, &[behave])?;
        info!(behave = ?target.behave, "behave state written");
        Ok(())
    }

    pub fn read_battery(&mut self) -> Result<Battery, DeviceError> {
        let mut cmds = [self.battery_command()?];
        self.transport.read(&mut cmds)?;
        match cmds[0] {
            AddressedCommand::Byte(read) => Ok(Battery::from_register(read)),
            other => Err(DeviceError::Detection {
                what: "battery threshold",
                reason: format!("{other:?} is not a single byte register"),
            }),
        }
    }

    /// Write the charge threshold; `NotKnown` leaves the register alone.
    pub fn set_battery(&mut self, battery: &Battery) -> Result<(), DeviceError> {
        let Some(value) = battery.threshold_value() else {
            return Ok(());
        };
        let offset = self
            .battery_command()?
            .offset()
            .ok_or(DeviceError::NotDetected)?;
        let mut handle = self.transport.start_writing()?;
        self.transport
            .write(&mut handle, &[AddressedCommand::byte(offset, value)])?;
        info!(offset, value, level = ?battery.max_level, "battery threshold written");
        Ok(())
    }

    /// Everything in one block, stamped with `tag`.
    pub fn read_full_information(&mut self, tag: u64) -> Result<FullInfoBlock, DeviceError> {
        let info = self.read_info()?;
        let boosters = self.read_boosters_states()?;
        let behave = self.read_behave_state()?;
        let battery = self.read_battery()?;
        debug!(tag, cpu = info.cpu.temperature, gpu = info.gpu.temperature, "full information read");
        Ok(FullInfoBlock {
            tag,
            info,
            boosters,
            behave,
            daemon_device_exception: String::new(),
            battery,
        })
    }

    fn set_fan_booster(&self, state: BoosterState) -> Result<(), DeviceError> {
        if state == BoosterState::NoChange {
            return Ok(());
        }
        let cmd = state_command(&self.table.booster_states(), state)?;
        let mut handle = self.transport.start_writing()?;
        self.transport.write(&mut handle, &[cmd])?;
        info!(state = ?state, "fan booster written");
        Ok(())
    }

    fn set_turbo(&self, state: CpuTurboBoostState) -> Result<(), DeviceError> {
        match state {
            CpuTurboBoostState::On => self.turbo.set_enabled(true)?,
            CpuTurboBoostState::Off => self.turbo.set_enabled(false)?,
            CpuTurboBoostState::NoChange => {}
        }
        Ok(())
    }

    /// Read a state map and return the one state whose encoding differs
    /// from the registers.
    fn read_state<S: Ord + Copy + fmt::Debug>(&self, canonical: StateMap<S>) -> Result<Option<S>, DeviceError> {
        let mut live = canonical.clone();
        self.transport.read_map(&mut live)?;
        Ok(canonical.diff(&live)?.map(|(state, _)| state))
    }

    fn cpu_tach_command(&mut self) -> Result<AddressedCommand, DeviceError> {
        let transport = &self.transport;
        let cmd = self.cpu_tach.detect_one_by_one("cpu tachometer", |candidate| {
            let mut probe = [*candidate];
            transport.read(&mut probe)?;
            Ok(rpm_is_plausible(rpm_from_tach(probe[0].raw_value().unwrap_or(0))))
        })?;
        Ok(*cmd)
    }

    /// The detected threshold register. Once found it is excused from the
    /// restore on exit: its value is the user's choice, not a guess.
    fn battery_command(&mut self) -> Result<AddressedCommand, DeviceError> {
        let newly = !self.battery.is_resolved();
        let transport = &self.transport;
        let cmd = *self.battery.detect_one_by_one("battery threshold", |candidate| {
            let mut probe = [*candidate];
            transport.read(&mut probe)?;
            Ok(probe[0]
                .raw_value()
                .and_then(|raw| u8::try_from(raw).ok())
                .is_some_and(Battery::is_threshold_value))
        })?;
        if newly {
            self.transport.cancel_backup_on(&[cmd]);
        }
        Ok(cmd)
    }
}

fn zone_info(temperature: &AddressedCommand, tach: &AddressedCommand) -> Info {
    Info {
        temperature: temperature.raw_value().unwrap_or(0),
        fan_rpm: rpm_from_tach(tach.raw_value().unwrap_or(0)),
    }
}

fn state_command<S: Ord + Copy + fmt::Debug>(map: &StateMap<S>, state: S) -> Result<AddressedCommand, DeviceError> {
    map.get(state)
        .copied()
        .ok_or_else(|| DeviceError::Unsupported(format!("no command for {state:?}")))
}
