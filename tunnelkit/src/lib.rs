//! SSH-tunneling core: host-key trust, authentication orchestration, and forward/reverse
//! TCP tunnels multiplexed over a single authenticated SSH session.

pub mod auth;
pub mod error;
pub mod halter;
pub mod idle_timeout;
pub mod secret;
pub mod session;
pub mod shovel;
pub mod trust;
pub mod tunnel;

pub use error::{AuthError, ConnectError, PolicyError, TimeoutError, TrustStoreError, TunnelError};
pub use halter::Halter;
pub use secret::Secret;
pub use session::{connect, SessionHandle};
pub use trust::{fingerprint, HostState, ServerPubKeyRecord, TrustStore};
