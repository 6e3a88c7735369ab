use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use ec_cmd::{AddressedCommand, CommandList, StateMap};
use ec_io::RegisterTransport;
use fanctl_proto::{BehaveState, BoosterState};
use tracing::{info, warn};

use crate::detector::ProperCommandDetector;
use crate::DeviceError;

/// Register layout of one laptop generation.
///
/// Only the behave map differs between the known generations; everything
/// else has a shared default.
pub trait CommandTable: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Auto/advanced fan mode switch.
    fn behave_states(&self) -> StateMap<BehaveState>;

    fn booster_states(&self) -> StateMap<BoosterState> {
        StateMap::new([
            (BoosterState::On, AddressedCommand::bits(0x98, 0x80, 0x80)),
            (BoosterState::Off, AddressedCommand::bits(0x98, 0x80, 0x00)),
            (BoosterState::NoChange, AddressedCommand::Noop),
        ])
    }

    fn cpu_temperature(&self) -> AddressedCommand {
        AddressedCommand::byte(0x68, 0)
    }

    /// Tachometer registers seen on different boards, most common first.
    fn cpu_tach_candidates(&self) -> CommandList {
        vec![AddressedCommand::word(0xC8, 0), AddressedCommand::word(0xCC, 0)]
    }

    fn gpu_temperature(&self) -> AddressedCommand {
        AddressedCommand::byte(0x80, 0)
    }

    fn gpu_tach(&self) -> AddressedCommand {
        AddressedCommand::word(0xCA, 0)
    }

    /// Charge threshold registers seen on different boards, most common first.
    fn battery_candidates(&self) -> CommandList {
        vec![AddressedCommand::byte(0xEF, 0), AddressedCommand::byte(0xD7, 0)]
    }
}

/// 10th generation Intel and newer.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntelGen10;

impl CommandTable for IntelGen10 {
    fn name(&self) -> &'static str {
        "intel-gen10"
    }

    fn behave_states(&self) -> StateMap<BehaveState> {
        StateMap::new([
            (BehaveState::Auto, AddressedCommand::byte(0xD4, 13)),
            (BehaveState::Advanced, AddressedCommand::byte(0xD4, 141)),
            (BehaveState::NoChange, AddressedCommand::Noop),
        ])
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IntelBeforeGen10;

impl CommandTable for IntelBeforeGen10 {
    fn name(&self) -> &'static str {
        "intel-before-gen10"
    }

    fn behave_states(&self) -> StateMap<BehaveState> {
        StateMap::new([
            (BehaveState::Auto, AddressedCommand::byte(0xF4, 12)),
            (BehaveState::Advanced, AddressedCommand::byte(0xF4, 140)),
            (BehaveState::NoChange, AddressedCommand::Noop),
        ])
    }
}

/// Known hardware generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    IntelGen10,
    IntelBeforeGen10,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::IntelGen10, Variant::IntelBeforeGen10];

    pub fn table(self) -> Box<dyn CommandTable> {
        match self {
            Variant::IntelGen10 => Box::new(IntelGen10),
            Variant::IntelBeforeGen10 => Box::new(IntelBeforeGen10),
        }
    }

    pub fn from_generation(generation: u32) -> Self {
        if generation > 9 {
            Variant::IntelGen10
        } else {
            Variant::IntelBeforeGen10
        }
    }

    /// Pick the variant from a CPU brand string; `None` when the brand is not
    /// an Intel part or carries no recognizable generation.
    pub fn from_brand(brand: &str) -> Option<Self> {
        if !brand.contains("Intel") {
            return None;
        }
        cpu_generation(brand).map(Self::from_generation)
    }

    /// Read the first `model name` of a `/proc/cpuinfo` style file.
    pub fn from_cpuinfo(path: &Path) -> Result<Option<Self>, DeviceError> {
        let text = fs::read_to_string(path).map_err(ec_io::EcIoError::from)?;
        let Some(brand) = text
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| key.trim() == "model name")
            .map(|(_, value)| value.trim())
        else {
            warn!(path = %path.display(), "no model name in cpuinfo");
            return Ok(None);
        };
        let variant = Self::from_brand(brand);
        info!(brand, variant = ?variant, "cpu identified");
        Ok(variant)
    }

    /// Decide from the live registers: the variant whose behave map shows
    /// exactly one differing state wins.
    pub fn probe(transport: &RegisterTransport) -> Result<Self, DeviceError> {
        let mut detector = ProperCommandDetector::new(Self::ALL.to_vec());
        let chosen = *detector.detect_at_once("variant", |all| {
            let mut matching = Vec::new();
            for variant in all {
                let canonical = variant.table().behave_states();
                let mut live = canonical.clone();
                transport.read_map(&mut live)?;
                if canonical.diff(&live)?.is_some() {
                    matching.push(variant);
                }
            }
            Ok(matching)
        })?;
        info!(variant = %chosen, "variant probed from registers");
        Ok(chosen)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::IntelGen10 => f.write_str("gen10"),
            Variant::IntelBeforeGen10 => f.write_str("before-gen10"),
        }
    }
}

impl FromStr for Variant {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gen10" => Ok(Variant::IntelGen10),
            "before-gen10" => Ok(Variant::IntelBeforeGen10),
            other => Err(DeviceError::Unsupported(format!("unknown variant {other:?}"))),
        }
    }
}

/// Intel Core generation from a brand string.
///
/// Understands both `11th Gen Intel(R) Core(TM) i7-11800H` and
/// `Intel(R) Core(TM) i7-8750H` forms. Model numbers with five digits carry
/// a two digit generation.
pub fn cpu_generation(brand: &str) -> Option<u32> {
    if let Some((head, _)) = brand.split_once("th Gen") {
        if let Ok(generation) = head.trim().parse() {
            return Some(generation);
        }
    }
    brand.split_whitespace().find_map(|word| {
        let (family, model) = word.split_once('-')?;
        if !matches!(family, "i3" | "i5" | "i7" | "i9") {
            return None;
        }
        let digits: String = model.chars().take_while(char::is_ascii_digit).collect();
        match digits.len() {
            4 => digits[..1].parse().ok(),
            5 => digits[..2].parse().ok(),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ec_io::{AccessMode, EcResource};

    #[test]
    fn generation_from_brand() {
        assert_eq!(cpu_generation("11th Gen Intel(R) Core(TM) i7-11800H @ 2.30GHz"), Some(11));
        assert_eq!(cpu_generation("Intel(R) Core(TM) i7-10750H CPU @ 2.60GHz"), Some(10));
        assert_eq!(cpu_generation("Intel(R) Core(TM) i7-8750H CPU @ 2.20GHz"), Some(8));
        assert_eq!(cpu_generation("AMD Ryzen 7 5800H with Radeon Graphics"), None);
    }

    #[test]
    fn variant_from_brand() {
        assert_eq!(
            Variant::from_brand("Intel(R) Core(TM) i7-10750H CPU"),
            Some(Variant::IntelGen10)
        );
        assert_eq!(
            Variant::from_brand("Intel(R) Core(TM) i5-9300H CPU"),
            Some(Variant::IntelBeforeGen10)
        );
        assert_eq!(Variant::from_brand("AMD Ryzen 9 5900HX"), None);
    }

    #[test]
    fn variant_from_cpuinfo_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cpuinfo");
        fs::write(
            &path,
            "processor\t: 0\nvendor_id\t: GenuineIntel\nmodel name\t: 12th Gen Intel(R) Core(TM) i7-12700H\n",
        )
        .expect("write");
        assert_eq!(Variant::from_cpuinfo(&path).expect("read"), Some(Variant::IntelGen10));
    }

    #[test]
    fn variant_names_parse_back() {
        for variant in Variant::ALL {
            assert_eq!(variant.to_string().parse::<Variant>().expect("parse"), variant);
        }
        assert!("gen7".parse::<Variant>().is_err());
    }

    fn transport_with(dir: &Path, bytes: &[(u64, u8)]) -> RegisterTransport {
        let resource = EcResource::new(&AccessMode::DryRun {
            dir: dir.to_path_buf(),
        })
        .expect("resource");
        let mut image = vec![0u8; ec_io::consts::REGISTER_FILE_SIZE];
        for &(offset, value) in bytes {
            image[offset as usize] = value;
        }
        fs::write(resource.path(), image).expect("seed");
        RegisterTransport::new(resource, None)
    }

    #[test]
    fn probe_picks_the_table_that_matches_the_registers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let transport = transport_with(dir.path(), &[(0xF4, 140)]);
        assert_eq!(Variant::probe(&transport).expect("probe"), Variant::IntelBeforeGen10);

        let dir = tempfile::tempdir().expect("tempdir");
        let transport = transport_with(dir.path(), &[(0xD4, 13)]);
        assert_eq!(Variant::probe(&transport).expect("probe"), Variant::IntelGen10);
    }

    #[test]
    fn probe_on_blank_registers_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let transport = transport_with(dir.path(), &[]);
        let err = Variant::probe(&transport).unwrap_err();
        assert!(err.is_fatal());
    }
}
