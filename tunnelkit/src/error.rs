use std::error::Error;

/// Errors raised while loading or persisting the trust store.
#[derive(thiserror::Error, Debug)]
pub enum TrustStoreError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed trust store record: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("unsupported trust store file extension: {0}")]
    UnsupportedEncoding(String),
}

/// A host-key policy rejection. Always fatal to the handshake that produced it.
#[derive(thiserror::Error, Debug, Clone)]
pub enum PolicyError {
    #[error("banned server")]
    Banned,
    #[error("known record mismatch: host key for {hostname} does not match the previously trusted key")]
    KnownRecordMismatch { hostname: String },
    #[error("unknown server; could be Man-In-The-Middle attack")]
    Unknown,
    #[error("good: add previously unknown sshd host {hostname} with the -new flag")]
    AddedNew { hostname: String },
}

/// Errors raised while building or running the authentication method list.
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("failed to load private key at {path}: {source}")]
    KeyLoad {
        path: String,
        #[source]
        source: russh::keys::Error,
    },
    #[error("no authentication method available: supply a key, a passphrase, or a TOTP URL")]
    NoMethodAvailable,
    #[error("unrecognized challenge prompt: {0:?}")]
    UnrecognizedChallenge(String),
    #[error("malformed TOTP URL: {0}")]
    InvalidTotpUrl(String),
    #[error("TOTP: {0}")]
    Totp(#[from] totp_rs::TotpUrlError),
}

/// Errors raised while establishing a session.
#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error("could not resolve {host}:{port}")]
    Resolve { host: String, port: u16 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Ssh(#[from] russh::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("host key rejected: {0}")]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    TrustStore(#[from] TrustStoreError),
    #[error("authentication failed: server rejected every offered method")]
    AuthRejected,
}

/// Errors surfaced from a single tunneled connection. These never bring down the owning
/// tunnel or session (§7 propagation policy) — they are logged at the call site.
#[derive(thiserror::Error, Debug)]
pub enum TunnelError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Ssh(#[from] russh::Error),
    #[error(transparent)]
    Other(Box<dyn Error + Send + Sync>),
}

impl TunnelError {
    pub fn other<E: Error + Send + Sync + 'static>(err: E) -> Self {
        Self::Other(Box::new(err))
    }
}

/// A timeout raised by [`crate::idle_timeout::ChannelWithIdleTimeout`], distinguishable
/// from EOF per §4.F / §8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutError;

impl TimeoutError {
    pub fn is_timeout(&self) -> bool {
        true
    }
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "idle timeout")
    }
}

impl Error for TimeoutError {}

impl From<TimeoutError> for std::io::Error {
    fn from(_: TimeoutError) -> Self {
        std::io::Error::new(std::io::ErrorKind::TimedOut, TimeoutError)
    }
}
