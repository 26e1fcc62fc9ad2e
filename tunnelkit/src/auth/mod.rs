//! Assembles the prioritized authentication method list and answers keyboard-interactive
//! challenges (§4.C).

mod totp;

pub use totp::TotpChallenger;

use std::path::Path;
use std::sync::Arc;

use russh::keys::PrivateKey;

use crate::error::AuthError;
use crate::secret::Secret;

/// Exact challenge-prompt literals the orchestrator recognizes (§6). Anything else is a
/// hard failure — there is no fuzzy matching.
pub const PASSWORD_PROMPT: &str = "password: ";
pub const GOOGLE_AUTHENTICATOR_PROMPT: &str = "google-authenticator-code: ";

/// One entry in the authentication method list offered to the SSH library, in the order
/// built by [`AuthOrchestrator::build`].
pub enum AuthMethod {
    PublicKey(Arc<PrivateKey>),
    Password(Secret<String>),
    KeyboardInteractive(KeyboardInteractiveResponder),
}

/// Answers keyboard-interactive challenges by literal prompt match (§4.C, §6).
pub struct KeyboardInteractiveResponder {
    passphrase: Option<Secret<String>>,
    totp: TotpChallenger,
}

impl KeyboardInteractiveResponder {
    pub fn answer(&self, prompt: &str) -> Result<String, AuthError> {
        match prompt {
            PASSWORD_PROMPT => self
                .passphrase
                .as_ref()
                .map(|p| p.expose_secret().clone())
                .ok_or_else(|| AuthError::UnrecognizedChallenge(prompt.to_owned())),
            GOOGLE_AUTHENTICATOR_PROMPT => Ok(self.totp.code_now()),
            other => Err(AuthError::UnrecognizedChallenge(other.to_owned())),
        }
    }
}

/// The prioritized method list built from whichever inputs were actually supplied.
pub struct AuthOrchestrator {
    methods: Vec<AuthMethod>,
}

impl AuthOrchestrator {
    /// Builds the list in order: public key, password, keyboard-interactive (§4.C).
    /// Each method is included only if its inputs are present; an empty `keypath` simply
    /// disables public-key auth, but a non-empty path that fails to load is a hard error.
    pub fn build(
        keypath: Option<&Path>,
        passphrase: Option<Secret<String>>,
        totp_url: Option<&Secret<String>>,
    ) -> Result<Self, AuthError> {
        let mut methods = Vec::new();

        if let Some(path) = keypath {
            let key = russh::keys::load_secret_key(path, None).map_err(|source| AuthError::KeyLoad {
                path: path.display().to_string(),
                source,
            })?;
            methods.push(AuthMethod::PublicKey(Arc::new(key)));
        }

        if let Some(passphrase) = &passphrase {
            methods.push(AuthMethod::Password(passphrase.clone()));
        }

        if let Some(totp_url) = totp_url {
            let totp = TotpChallenger::from_url(totp_url)?;
            methods.push(AuthMethod::KeyboardInteractive(KeyboardInteractiveResponder {
                passphrase: passphrase.clone(),
                totp,
            }));
        }

        if methods.is_empty() {
            return Err(AuthError::NoMethodAvailable);
        }

        Ok(Self { methods })
    }

    pub fn methods(&self) -> &[AuthMethod] {
        &self.methods
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_inputs_yield_no_method_error() {
        let err = AuthOrchestrator::build(None, None, None).unwrap_err();
        assert!(matches!(err, AuthError::NoMethodAvailable));
    }

    #[test]
    fn password_only_builds_single_method() {
        let orch = AuthOrchestrator::build(None, Some(Secret::new("hunter2".to_owned())), None).unwrap();
        assert_eq!(orch.methods().len(), 1);
        assert!(matches!(orch.methods()[0], AuthMethod::Password(_)));
    }

    #[test]
    fn unloadable_key_path_is_a_hard_error() {
        let err = AuthOrchestrator::build(
            Some(Path::new("/nonexistent/path/to/key")),
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::KeyLoad { .. }));
    }

    #[test]
    fn keyboard_interactive_responder_matches_literals_exactly() {
        let url = "otpauth://totp/t:a?secret=GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ&issuer=t";
        let responder = KeyboardInteractiveResponder {
            passphrase: Some(Secret::new("swordfish".to_owned())),
            totp: TotpChallenger::from_url(&Secret::new(url.to_owned())).unwrap(),
        };

        assert_eq!(responder.answer(PASSWORD_PROMPT).unwrap(), "swordfish");
        assert_eq!(responder.answer(GOOGLE_AUTHENTICATOR_PROMPT).unwrap().len(), 6);
        assert!(responder.answer("login: ").is_err());
    }
}
