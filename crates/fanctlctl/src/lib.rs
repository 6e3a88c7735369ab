pub mod cmd_daemon;
pub mod cmd_set;
pub mod cmd_status;
pub mod cmd_watch;
pub mod common;
