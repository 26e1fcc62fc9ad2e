use std::time::{SystemTime, UNIX_EPOCH};

use totp_rs::TOTP;

use crate::error::AuthError;
use crate::secret::Secret;

/// A parsed `otpauth://totp/...` URL (§6), ready to answer keyboard-interactive
/// challenges with RFC-6238 codes.
pub struct TotpChallenger(TOTP);

impl TotpChallenger {
    pub fn from_url(url: &Secret<String>) -> Result<Self, AuthError> {
        let totp = TOTP::from_url(url.expose_secret())
            .map_err(|_| AuthError::InvalidTotpUrl(url.expose_secret().clone()))?;
        Ok(Self(totp))
    }

    /// The six-digit code for the current wall-clock time.
    pub fn code_now(&self) -> String {
        self.code_at(now_unix())
    }

    /// The six-digit code for an arbitrary timestamp — split out so tests can pin a
    /// fixed clock (§8 scenario 7) without sleeping.
    pub fn code_at(&self, unix_time: u64) -> String {
        self.0.generate(unix_time)
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_secs()
}
