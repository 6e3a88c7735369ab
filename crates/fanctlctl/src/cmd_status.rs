use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use fanctl::UiClient;
use tracing::info;

use crate::common::{self, Report};

pub async fn run(shm_dir: Option<PathBuf>, json: bool) -> Result<()> {
    let config = common::client_config(shm_dir);
    let block = tokio::task::spawn_blocking(move || -> Result<_> {
        let mut client = UiClient::connect(config).context("connect to daemon")?;
        if !client.refresh().context("request fresh data")? {
            bail!("daemon did not answer");
        }
        Ok(client.last_known().clone())
    })
    .await
    .context("join status request")??;
    info!(tag = block.tag, "daemon answered");

    if json {
        common::print_json(&Report::now(&block)?)?;
    } else {
        common::print_block(&block);
    }
    Ok(())
}
