use std::env;
use std::fs;
use std::time::Duration;

use fanctl::{ClientConfig, DaemonConfig, DaemonService, Runner, UiClient};
use fanctl_device::Variant;
use fanctl_proto::{BoosterState, ChannelConfig, RequestFromUi};
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let dir = tempfile::tempdir()?;

    // Optional 256-byte dump of a real controller as first argument.
    let image = match env::args().nth(1) {
        Some(path) => path.into(),
        None => {
            let mut image = vec![0u8; ec_io::consts::REGISTER_FILE_SIZE];
            image[0x68] = 62;
            image[0x80] = 54;
            image[0xD4] = 13;
            image[0xEF] = 0x80 + 60;
            let path = dir.path().join("seed.bin");
            fs::write(&path, image)?;
            path
        }
    };

    let cadence = Duration::from_millis(50);
    let mut service = DaemonService::new(DaemonConfig {
        variant: Some(Variant::IntelGen10),
        register_image: Some(image),
        cadence,
        ..DaemonConfig::dry_run(dir.path())
    })?;
    let daemon = Runner::spawn("demo-daemon", move |stop| service.serve(&stop))?;
    info!(dir = %dir.path().display(), "dry-run daemon up");

    let mut client = UiClient::connect(ClientConfig {
        channel: ChannelConfig {
            shm_dir: dir.path().to_path_buf(),
            ..ChannelConfig::default()
        },
        service_delay: cadence,
        answer_timeout: cadence * 20,
    })?;

    if client.refresh()? {
        let block = client.last_known();
        println!(
            "cpu {}C {} rpm, gpu {}C, booster {:?}, battery {:?}",
            block.info.cpu.temperature,
            block.info.cpu.fan_rpm,
            block.info.gpu.temperature,
            block.boosters.fan_booster,
            block.battery.max_level,
        );
    }

    let mut request = RequestFromUi::default();
    request.boosters.fan_booster = BoosterState::On;
    if client.apply(request)? {
        println!(
            "after write: booster {:?}, tag {}",
            client.last_known().boosters.fan_booster,
            client.last_known().tag
        );
    }

    daemon.stop_flag().stop();
    if let Some(result) = daemon.join() {
        result?;
    }
    Ok(())
}
