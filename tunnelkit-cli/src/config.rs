//! CLI-flag-driven configuration value.
//!
//! A plain struct threaded down to the library calls it drives — no process-global
//! singleton.

use std::path::PathBuf;
use std::time::Duration;

use tunnelkit::Secret;

/// Everything [`tunnelkit::connect`] and the tunnel starters need, assembled once from
/// CLI flags in `main`.
pub struct Config {
    pub user: String,
    pub identity: Option<PathBuf>,
    pub password: Option<Secret<String>>,
    pub totp_url: Option<Secret<String>>,
    pub sshd_host: String,
    pub sshd_port: u16,
    pub trust_store_path: PathBuf,
    pub add_if_not_known: bool,
    pub allow_oneshot: bool,
    pub idle_timeout: Duration,
}
