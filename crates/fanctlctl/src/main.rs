use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use fanctl_device::Variant;
use tracing_subscriber::EnvFilter;

use fanctlctl::cmd_daemon::{self, DaemonArgs};
use fanctlctl::cmd_set::{self, SetArgs};
use fanctlctl::cmd_status;
use fanctlctl::cmd_watch::{self, WatchArgs};
use fanctlctl::common::{ChargeLimit, Toggle};

#[derive(Parser, Debug)]
#[command(name = "fanctlctl", version, about = "MSI laptop fan and booster control")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Output JSON where applicable
    #[arg(long)]
    json: bool,
    /// Directory holding the shared channel (default /dev/shm)
    #[arg(long, global = true)]
    shm_dir: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the privileged daemon that owns the embedded controller
    Daemon {
        /// Use a register file instead of the hardware
        #[arg(long)]
        dry_run: bool,
        /// Directory of the dry-run register file (default: temp dir)
        #[arg(long)]
        dry_run_dir: Option<PathBuf>,
        /// 256-byte register dump to seed the dry-run file with
        #[arg(long)]
        register_image: Option<PathBuf>,
        /// Engage syscall restrictions after start-up
        #[arg(long)]
        restrict: bool,
        /// Force the register layout (gen10, before-gen10)
        #[arg(long)]
        variant: Option<Variant>,
        #[arg(long)]
        cadence_ms: Option<u64>,
    },
    /// Read fresh data through the daemon
    Status,
    /// Change boosters or the battery charge limit
    Set {
        #[arg(long, value_enum)]
        booster: Option<Toggle>,
        #[arg(long, value_enum)]
        turbo: Option<Toggle>,
        #[arg(long, value_enum)]
        battery: Option<ChargeLimit>,
    },
    /// Keep polling the daemon, optionally driving boosters automatically
    Watch {
        #[arg(long)]
        game_mode: bool,
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        #[arg(long)]
        count: Option<u64>,
        #[arg(long)]
        fan_cpu_only: Option<f32>,
        #[arg(long)]
        fan_shared: Option<f32>,
        #[arg(long)]
        turbo_hot: Option<f32>,
        #[arg(long)]
        turbo_cold: Option<f32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.cmd {
        Cmd::Daemon {
            dry_run,
            dry_run_dir,
            register_image,
            restrict,
            variant,
            cadence_ms,
        } => {
            let args = DaemonArgs {
                dry_run,
                dry_run_dir,
                register_image,
                restrict,
                variant,
                shm_dir: cli.shm_dir,
                cadence_ms,
            };
            cmd_daemon::run(args).await?
        }
        Cmd::Status => cmd_status::run(cli.shm_dir, cli.json).await?,
        Cmd::Set {
            booster,
            turbo,
            battery,
        } => {
            let args = SetArgs {
                booster,
                turbo,
                battery,
            };
            cmd_set::run(args, cli.shm_dir, cli.json).await?
        }
        Cmd::Watch {
            game_mode,
            interval_ms,
            count,
            fan_cpu_only,
            fan_shared,
            turbo_hot,
            turbo_cold,
        } => {
            let args = WatchArgs {
                game_mode,
                interval_ms,
                count,
                fan_cpu_only,
                fan_shared,
                turbo_hot,
                turbo_cold,
            };
            cmd_watch::run(args, cli.shm_dir, cli.json).await?
        }
    }

    Ok(())
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
