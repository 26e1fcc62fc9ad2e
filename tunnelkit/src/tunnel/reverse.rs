//! `start_reverse(session, remote_listen_addr, local_forward_addr)`: ask the peer to
//! listen on our behalf, then for each peer-initiated stream dial a local TCP endpoint
//! and shovel between them (§4.H).

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::TunnelError;
use crate::idle_timeout::ChannelWithIdleTimeout;
use crate::session::{ForwardedStreamParams, SessionHandle};
use crate::shovel::ShovelPair;

/// Issues a `tcpip-forward` request for `(remote_host, remote_port)` on `session` and,
/// in a dedicated task, accepts the resulting peer-initiated streams and relays each to
/// `local_forward_addr`. Returns once the remote listener is registered; the accept
/// loop itself runs until the session's halter fires or the session closes.
///
/// `idle_timeout` (§4.F) is applied to the peer-initiated channel side of each
/// connection; `Duration::ZERO` disables it.
///
/// Unlike [`crate::tunnel::start_forward`], this loop does not need a periodic accept
/// deadline: cancellation is observed through [`SessionHandle::accept_forwarded`]
/// returning `None` once the session closes, not through a local listener (§4.H note).
pub async fn start_reverse(
    session: Arc<SessionHandle>,
    remote_host: impl Into<String>,
    remote_port: u32,
    local_forward_addr: impl Into<String>,
    idle_timeout: Duration,
) -> Result<JoinHandle<()>, TunnelError> {
    let remote_host = remote_host.into();
    let local_forward_addr = local_forward_addr.into();

    session
        .request_remote_listener(&remote_host, remote_port)
        .await?;

    let halter = session.halter();

    let handle = tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = halter.halted() => {
                    debug!(%remote_host, remote_port, "reverse tunnel halted");
                    break;
                }
                accepted = session.accept_forwarded() => accepted,
            };

            let Some((remote_stream, params)) = accepted else {
                debug!(%remote_host, remote_port, "session closed, reverse tunnel exiting");
                break;
            };

            let local_forward_addr = local_forward_addr.clone();
            tokio::spawn(async move {
                if let Err(error) =
                    handle_reverse_connection(remote_stream, &local_forward_addr, &params, idle_timeout).await
                {
                    warn!(?error, ?params, "reverse connection failed");
                }
            });
        }
    });

    Ok(handle)
}

async fn handle_reverse_connection<S>(
    remote_stream: S,
    local_forward_addr: &str,
    params: &ForwardedStreamParams,
    idle_timeout: Duration,
) -> Result<(), TunnelError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    debug!(
        originator = %params.originator_address,
        originator_port = params.originator_port,
        %local_forward_addr,
        "dialing local forward target"
    );

    let remote_stream = ChannelWithIdleTimeout::new(remote_stream, idle_timeout);
    let local_stream = TcpStream::connect(local_forward_addr).await.map_err(TunnelError::Io)?;

    let mut pair = ShovelPair::new();
    pair.start(remote_stream, local_stream, "remote->local", "local->remote");
    pair.wait().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn dialing_an_unreachable_local_target_is_reported() {
        // Bind then drop immediately so the port is very likely refused.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TcpStream::connect(addr).await;
        assert!(err.is_err());
    }
}
