#![cfg_attr(docsrs, feature(doc_cfg))]
//! Workspace facade: re-exports the fan controller crates under one name.
//!
//! ```rust,no_run
//! use msi_fanctl::fanctl::{ClientConfig, UiClient};
//!
//! # fn run() -> Result<(), msi_fanctl::fanctl::ServiceError> {
//! let mut client = UiClient::connect(ClientConfig::default())?;
//! if client.refresh()? {
//!     let info = &client.last_known().info;
//!     println!("cpu {}C at {} rpm", info.cpu.temperature, info.cpu.fan_rpm);
//! }
//! # Ok(())
//! # }
//! ```

pub use ec_cmd;
pub use ec_io;
pub use fanctl;
pub use fanctl_decide;
pub use fanctl_device;
pub use fanctl_proto;
