use ec_cmd::{AddressedCommand, AddressedValue, CommandList};
use thiserror::Error;

use crate::consts::RPM_DIVIDEND;

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $raw:literal ),+ $(,)?
        }
        default = $default:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Raw value used by the binary encoding.
            pub const fn to_raw(self) -> u8 {
                match self {
                    $( $name::$variant => $raw ),+
                }
            }

            pub const fn from_raw(raw: u8) -> Option<Self> {
                match raw {
                    $( $raw => Some($name::$variant), )+
                    _ => None,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }
    };
}

wire_enum! {
    /// Fan booster (maximum fan speed override).
    pub enum BoosterState {
        On = 0,
        Off = 1,
        NoChange = 2,
    }
    default = NoChange
}

wire_enum! {
    /// Firmware fan control mode.
    pub enum BehaveState {
        /// Firmware curve.
        Auto = 0,
        /// User-provided curve.
        Advanced = 1,
        NoChange = 2,
    }
    default = NoChange
}

wire_enum! {
    /// CPU frequency boost, toggled through the OS rather than the EC.
    pub enum CpuTurboBoostState {
        On = 0,
        Off = 1,
        NoChange = 2,
    }
    default = NoChange
}

wire_enum! {
    /// Charge limit presets of the battery controller.
    pub enum BatteryLevel {
        /// Stop charging at 60%.
        BestForBattery = 0,
        /// Stop charging at 80%.
        Balanced = 1,
        /// Charge to 100%.
        BestForMobility = 2,
        NotKnown = 3,
    }
    default = NotKnown
}

wire_enum! {
    /// What the UI asks the daemon to do during the next cycle.
    pub enum RequestKind {
        /// Only advance the tag; the rest is the last read data.
        Ping = 0,
        /// Re-read the hardware.
        ReadFreshData = 1,
        /// Apply the request, then re-read the hardware.
        WriteData = 2,
    }
    default = Ping
}

/// Temperature and fan speed of one cooling zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Info {
    /// Degrees Celsius.
    pub temperature: u16,
    pub fan_rpm: u16,
}

impl Info {
    /// Build from the raw temperature byte and the tachometer period.
    pub fn from_raw(temperature: u8, tach: u16) -> Self {
        Self {
            temperature: u16::from(temperature),
            fan_rpm: rpm_from_tach(tach),
        }
    }

    /// Readings a real sensor can produce; zero means "not spinning / idle".
    pub fn is_plausible(&self) -> bool {
        let temp_ok = self.temperature == 0 || (10..150).contains(&self.temperature);
        temp_ok && rpm_is_plausible(self.fan_rpm)
    }
}

/// Convert a tachometer period into RPM; a zero period means a stopped fan.
pub fn rpm_from_tach(tach: u16) -> u16 {
    if tach == 0 {
        return 0;
    }
    u16::try_from(RPM_DIVIDEND / u32::from(tach)).unwrap_or(u16::MAX)
}

pub fn rpm_is_plausible(rpm: u16) -> bool {
    rpm == 0 || (500..12_000).contains(&rpm)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CpuGpuInfo {
    pub cpu: Info,
    pub gpu: Info,
}

/// Fan booster and CPU turbo bound together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoostersStates {
    pub fan_booster: BoosterState,
    pub cpu_turbo: CpuTurboBoostState,
}

impl BoostersStates {
    /// `true` when anything differs from the all-`NoChange` default.
    pub fn has_any_change(&self) -> bool {
        *self != Self::default()
    }
}

/// Rejection reasons for a fan curve.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CurveError {
    #[error("curve entry {index} is not a single byte value")]
    NotSingleByte { index: usize },
    #[error("curve must increase: entry at {offset:#04x} breaks the order")]
    NotMonotonic { offset: u64 },
    #[error("curve address {offset:#04x} is not allowed")]
    AddressNotAllowed { offset: u64 },
}

/// CPU and GPU fan curves: 1-byte temperature steps, one per fan speed level.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CpuGpuFanCurve {
    pub cpu: CommandList,
    pub gpu: CommandList,
}

const DEFAULT_CPU_CURVE: [(u64, u8); 7] = [
    (0x72, 0),
    (0x73, 40),
    (0x74, 48),
    (0x75, 56),
    (0x76, 64),
    (0x77, 72),
    (0x78, 80),
];

const DEFAULT_GPU_CURVE: [(u64, u8); 7] = [
    (0x8A, 0),
    (0x8B, 48),
    (0x8C, 56),
    (0x8D, 64),
    (0x8E, 72),
    (0x8F, 79),
    (0x90, 86),
];

fn curve_from(points: &[(u64, u8)]) -> CommandList {
    points
        .iter()
        .map(|&(offset, value)| AddressedCommand::byte(offset, value))
        .collect()
}

impl Default for CpuGpuFanCurve {
    fn default() -> Self {
        Self {
            cpu: curve_from(&DEFAULT_CPU_CURVE),
            gpu: curve_from(&DEFAULT_GPU_CURVE),
        }
    }
}

impl CpuGpuFanCurve {
    pub fn empty() -> Self {
        Self {
            cpu: Vec::new(),
            gpu: Vec::new(),
        }
    }

    /// Only the addresses of the default curves may be written, and each curve
    /// must have strictly increasing addresses with non-decreasing values.
    pub fn validate(&self) -> Result<(), CurveError> {
        validate_curve(&self.cpu, &DEFAULT_CPU_CURVE)?;
        validate_curve(&self.gpu, &DEFAULT_GPU_CURVE)
    }
}

fn validate_curve(curve: &[AddressedCommand], allowed: &[(u64, u8)]) -> Result<(), CurveError> {
    let mut previous: Option<AddressedValue<u8>> = None;
    for (index, cmd) in curve.iter().enumerate() {
        let AddressedCommand::Byte(point) = *cmd else {
            return Err(CurveError::NotSingleByte { index });
        };
        if !allowed.iter().any(|&(offset, _)| offset == point.offset) {
            return Err(CurveError::AddressNotAllowed {
                offset: point.offset,
            });
        }
        if let Some(prev) = previous {
            if prev.offset >= point.offset || prev.value > point.value {
                return Err(CurveError::NotMonotonic {
                    offset: point.offset,
                });
            }
        }
        previous = Some(point);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BehaveWithCurve {
    pub behave: BehaveState,
    pub curve: CpuGpuFanCurve,
}

impl Default for BehaveWithCurve {
    fn default() -> Self {
        Self {
            behave: BehaveState::NoChange,
            curve: CpuGpuFanCurve::default(),
        }
    }
}

impl BehaveWithCurve {
    /// `NoChange` without curves; what the UI sends when it has no curve intent.
    pub fn empty() -> Self {
        Self {
            behave: BehaveState::NoChange,
            curve: CpuGpuFanCurve::empty(),
        }
    }
}

/// Battery charge limit plus the raw register read it was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Battery {
    pub max_level: BatteryLevel,
    raw_read: AddressedValue<u8>,
}

impl Default for Battery {
    fn default() -> Self {
        Self::new(BatteryLevel::NotKnown)
    }
}

/// Charge threshold registers hold `0x80 + percent`.
const THRESHOLD_BASE: u8 = 0x80;

impl Battery {
    pub const fn new(max_level: BatteryLevel) -> Self {
        Self {
            max_level,
            raw_read: AddressedValue::new(0, 0),
        }
    }

    /// Decode the level from a threshold register read.
    pub fn from_register(read: AddressedValue<u8>) -> Self {
        let level = match read.value {
            v if !Self::is_threshold_value(v) => BatteryLevel::NotKnown,
            v if v == THRESHOLD_BASE + 60 => BatteryLevel::BestForBattery,
            v if v == THRESHOLD_BASE + 80 => BatteryLevel::Balanced,
            v if v > THRESHOLD_BASE + 80 => BatteryLevel::BestForMobility,
            _ => BatteryLevel::NotKnown,
        };
        Self {
            max_level: level,
            raw_read: read,
        }
    }

    /// Whether `raw` is a value the threshold register can hold.
    pub fn is_threshold_value(raw: u8) -> bool {
        (THRESHOLD_BASE..=THRESHOLD_BASE + 100).contains(&raw)
    }

    /// Register value encoding `max_level`, `None` for `NotKnown`.
    pub fn threshold_value(&self) -> Option<u8> {
        let percent = match self.max_level {
            BatteryLevel::BestForBattery => 60,
            BatteryLevel::Balanced => 80,
            BatteryLevel::BestForMobility => 100,
            BatteryLevel::NotKnown => return None,
        };
        Some(THRESHOLD_BASE + percent)
    }

    /// Raw register read, for diagnostics only.
    pub fn raw_read(&self) -> AddressedValue<u8> {
        self.raw_read
    }

    pub(crate) fn with_raw_read(max_level: BatteryLevel, raw_read: AddressedValue<u8>) -> Self {
        Self {
            max_level,
            raw_read,
        }
    }
}

/// Everything the daemon knows, published after each served request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FullInfoBlock {
    /// Advanced by the daemon for every answered request, pings included.
    pub tag: u64,
    pub info: CpuGpuInfo,
    pub boosters: BoostersStates,
    pub behave: BehaveWithCurve,
    /// Text of the last device failure, empty when the read succeeded.
    pub daemon_device_exception: String,
    pub battery: Battery,
}

/// Request left by the UI for the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RequestFromUi {
    pub kind: RequestKind,
    pub boosters: BoostersStates,
    pub behave: BehaveWithCurve,
    pub battery: Battery,
}

impl Default for RequestFromUi {
    fn default() -> Self {
        Self::with_kind(RequestKind::Ping)
    }
}

impl RequestFromUi {
    pub fn with_kind(kind: RequestKind) -> Self {
        Self {
            kind,
            boosters: BoostersStates::default(),
            behave: BehaveWithCurve::empty(),
            battery: Battery::default(),
        }
    }

    /// `true` when the request carries something for the daemon to apply.
    pub fn has_user_action(&self) -> bool {
        self.boosters.has_any_change() || self.battery.max_level != BatteryLevel::NotKnown
    }
}
