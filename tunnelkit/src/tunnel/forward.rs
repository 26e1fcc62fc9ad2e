//! `start_forward(session, local_addr, remote_addr)`: local TCP listener -> open SSH
//! channel -> shovel pair, per accepted connection (§4.G).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::TunnelError;
use crate::idle_timeout::ChannelWithIdleTimeout;
use crate::session::SessionHandle;
use crate::shovel::ShovelPair;

/// How often the accept loop re-polls the shutdown signal while waiting for a
/// connection, mirroring the "periodic accept deadline" design note in §4.G/§9.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Binds `local_addr` and, in a dedicated task, accepts connections and forwards each to
/// `(remote_host, remote_port)` through `session`. Returns once the listener is bound;
/// the accept loop itself runs until the session's halter fires or the listener errors.
///
/// `idle_timeout` (§4.F) is applied to the `direct-tcpip` channel side of each
/// connection; `Duration::ZERO` disables it.
pub async fn start_forward(
    session: Arc<SessionHandle>,
    local_addr: &str,
    remote_host: impl Into<String>,
    remote_port: u32,
    idle_timeout: Duration,
) -> Result<JoinHandle<()>, TunnelError> {
    let listener = TcpListener::bind(local_addr).await.map_err(TunnelError::Io)?;
    let local_addr = local_addr.to_owned();
    let remote_host = remote_host.into();
    let halter = session.halter();

    let handle = tokio::spawn(async move {
        loop {
            if halter.is_halted() {
                debug!(%local_addr, "forward tunnel halted");
                break;
            }

            match tokio::time::timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    let session = session.clone();
                    let remote_host = remote_host.clone();
                    tokio::spawn(async move {
                        if let Err(error) = handle_forward_connection(
                            &session,
                            stream,
                            peer,
                            &remote_host,
                            remote_port,
                            idle_timeout,
                        )
                        .await
                        {
                            warn!(?error, %peer, "forward connection failed");
                        }
                    });
                }
                Ok(Err(error)) => {
                    error!(?error, %local_addr, "forward listener error");
                    break;
                }
                Err(_elapsed) => continue,
            }
        }
    });

    Ok(handle)
}

async fn handle_forward_connection(
    session: &SessionHandle,
    local_stream: TcpStream,
    peer: SocketAddr,
    remote_host: &str,
    remote_port: u32,
    idle_timeout: Duration,
) -> Result<(), TunnelError> {
    let channel_stream = session
        .open_direct_tcpip(remote_host, remote_port, &peer.ip().to_string(), peer.port() as u32)
        .await?;
    let channel_stream = ChannelWithIdleTimeout::new(channel_stream, idle_timeout);

    let mut pair = ShovelPair::new();
    pair.start(local_stream, channel_stream, "local->remote", "remote->local");
    pair.wait().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binding_an_address_already_in_use_is_reported() {
        let held = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = held.local_addr().unwrap();

        let second = TcpListener::bind(addr).await;
        assert!(second.is_err());
    }
}
