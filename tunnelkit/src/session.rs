//! Dials TCP, runs the SSH handshake with the §4.C auth list and the §4.B policy
//! callback, and produces a live [`SessionHandle`] (§4.D).

use std::net::ToSocketAddrs;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use base64::Engine;
use russh::client::{Handle, Msg};
use russh::keys::{PublicKey, PublicKeyBase64};
use russh::Channel;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info, instrument, warn};

use crate::auth::{AuthMethod, AuthOrchestrator};
use crate::error::{AuthError, ConnectError, PolicyError};
use crate::halter::Halter;
use crate::secret::Secret;
use crate::trust::{classify, fingerprint, require_known_ok, Advisory, HostState, TrustStore};

/// Parameters describing a peer-initiated stream delivered through a `tcpip-forward`
/// listen request (§4.H, glossary "Remote TCP forward").
#[derive(Debug, Clone)]
pub struct ForwardedStreamParams {
    pub originator_address: String,
    pub originator_port: u32,
}

type ForwardedItem = (Channel<Msg>, ForwardedStreamParams);

struct ClientHandler {
    hostname: String,
    remote_addr: String,
    trust_store: Arc<TokioMutex<TrustStore>>,
    add_if_not_known: bool,
    allow_oneshot: bool,
    classification: Arc<StdMutex<Option<(HostState, Advisory)>>>,
    forwarded_tx: UnboundedSender<ForwardedItem>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ClientHandlerError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    TrustStore(#[from] crate::error::TrustStoreError),
    #[error(transparent)]
    Ssh(#[from] russh::Error),
}

#[async_trait::async_trait]
impl russh::client::Handler for ClientHandler {
    type Error = ClientHandlerError;

    async fn check_server_key(self, server_public_key: &PublicKey) -> Result<(Self, bool), Self::Error> {
        let key_base64 = server_public_key.public_key_base64();
        let human_key = format!("{} {}", server_public_key.algorithm().as_str(), key_base64);
        let wire_bytes = base64::engine::general_purpose::STANDARD
            .decode(key_base64.as_bytes())
            .unwrap_or_default();
        let print = fingerprint(&wire_bytes);
        debug!(hostname = %self.hostname, fingerprint = %print, "classifying host key");

        let mut store = self.trust_store.lock().await;
        let (state, _record, advisory) = classify(
            &mut store,
            &self.hostname,
            &self.remote_addr,
            &human_key,
            self.add_if_not_known,
            self.allow_oneshot,
        )
        .await?;
        drop(store);

        *self.classification.lock().expect("classification lock poisoned") = Some((state.clone(), advisory));

        if let Err(policy_error) = require_known_ok(&state, &self.hostname) {
            warn!(hostname = %self.hostname, ?state, "host key rejected");
            return Err(ClientHandlerError::Policy(policy_error));
        }

        Ok((self, true))
    }

    async fn server_channel_open_forwarded_tcpip(
        self,
        channel: Channel<Msg>,
        _connected_address: &str,
        _connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        session: russh::client::Session,
    ) -> Result<(Self, russh::client::Session), Self::Error> {
        let params = ForwardedStreamParams {
            originator_address: originator_address.to_owned(),
            originator_port,
        };
        let _ = self.forwarded_tx.send((channel, params));
        Ok((self, session))
    }
}

/// A live, authenticated SSH session capable of opening outgoing forwarded channels and
/// accepting peer-initiated ones (§3 "SessionHandle").
pub struct SessionHandle {
    handle: Handle<ClientHandler>,
    classification: Arc<StdMutex<Option<(HostState, Advisory)>>>,
    forwarded_rx: TokioMutex<UnboundedReceiver<ForwardedItem>>,
    halter: Halter,
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip(passphrase, totp_url, trust_store), fields(user, sshd_host, sshd_port))]
pub async fn connect(
    user: &str,
    keypath: Option<&Path>,
    passphrase: Option<Secret<String>>,
    totp_url: Option<&Secret<String>>,
    sshd_host: &str,
    sshd_port: u16,
    trust_store: Arc<TokioMutex<TrustStore>>,
    add_if_not_known: bool,
    allow_oneshot: bool,
    halter: Halter,
) -> Result<SessionHandle, ConnectError> {
    let orchestrator = AuthOrchestrator::build(keypath, passphrase, totp_url).map_err(ConnectError::Auth)?;

    let address = (sshd_host, sshd_port)
        .to_socket_addrs()
        .map_err(ConnectError::Io)?
        .next()
        .ok_or_else(|| ConnectError::Resolve {
            host: sshd_host.to_owned(),
            port: sshd_port,
        })?;

    let (forwarded_tx, forwarded_rx) = unbounded_channel();
    let classification = Arc::new(StdMutex::new(None));

    let handler = ClientHandler {
        hostname: sshd_host.to_owned(),
        remote_addr: address.to_string(),
        trust_store,
        add_if_not_known,
        allow_oneshot,
        classification: classification.clone(),
        forwarded_tx,
    };

    let config = Arc::new(russh::client::Config::default());
    let mut handle = russh::client::connect(config, address, handler)
        .await
        .map_err(|e| match e {
            russh::Error::IO(io) => ConnectError::Io(io),
            other => ConnectError::Ssh(other),
        })?;

    let mut authenticated = false;
    for method in orchestrator.methods() {
        authenticated = authenticate(&mut handle, user, method).await?;
        if authenticated {
            break;
        }
    }

    if !authenticated {
        let _ = handle.disconnect(russh::Disconnect::ByApplication, "", "").await;
        return Err(ConnectError::AuthRejected);
    }

    info!(%user, %sshd_host, %sshd_port, "session established");

    Ok(SessionHandle {
        handle,
        classification,
        forwarded_rx: TokioMutex::new(forwarded_rx),
        halter,
    })
}

async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    user: &str,
    method: &AuthMethod,
) -> Result<bool, ConnectError> {
    match method {
        AuthMethod::PublicKey(key) => Ok(handle
            .authenticate_publickey(user.to_owned(), key.clone())
            .await?),
        AuthMethod::Password(password) => Ok(handle
            .authenticate_password(user.to_owned(), password.expose_secret())
            .await?),
        AuthMethod::KeyboardInteractive(responder) => {
            keyboard_interactive_loop(handle, user, responder).await
        }
    }
}

async fn keyboard_interactive_loop(
    handle: &mut Handle<ClientHandler>,
    user: &str,
    responder: &crate::auth::KeyboardInteractiveResponder,
) -> Result<bool, ConnectError> {
    use russh::client::KeyboardInteractiveAuthResponse as Response;

    let mut response = handle
        .authenticate_keyboard_interactive_start(user.to_owned(), None)
        .await?;

    loop {
        match response {
            Response::Success => return Ok(true),
            Response::Failure { .. } => return Ok(false),
            Response::InfoRequest { ref prompts, .. } => {
                let mut answers = Vec::with_capacity(prompts.len());
                for prompt in prompts {
                    let answer = responder
                        .answer(&prompt.prompt)
                        .map_err(|e: AuthError| ConnectError::Auth(e))?;
                    answers.push(answer);
                }
                response = handle.authenticate_keyboard_interactive_respond(answers).await?;
            }
        }
    }
}

impl SessionHandle {
    /// The classification produced by the most recent host-key check, available once
    /// the handshake has completed or failed (§4.B).
    pub fn last_classification(&self) -> Option<(HostState, Advisory)> {
        self.classification.lock().expect("classification lock poisoned").clone()
    }

    pub fn halter(&self) -> Halter {
        self.halter.clone()
    }

    /// Opens a client-initiated `direct-tcpip` channel to `(host, port)` (§4.G).
    pub async fn open_direct_tcpip(
        &self,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
    ) -> Result<impl AsyncRead + AsyncWrite + Send + Unpin + 'static, crate::error::TunnelError> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(
                host_to_connect.to_owned(),
                port_to_connect,
                originator_address.to_owned(),
                originator_port,
            )
            .await
            .map_err(crate::error::TunnelError::Ssh)?;
        Ok(channel.into_stream())
    }

    /// Requests that the peer start listening on `(address, port)` on our behalf (§4.H).
    pub async fn request_remote_listener(
        &self,
        address: &str,
        port: u32,
    ) -> Result<(), crate::error::TunnelError> {
        self.handle
            .tcpip_forward(address.to_owned(), port)
            .await
            .map_err(crate::error::TunnelError::Ssh)?;
        Ok(())
    }

    pub async fn cancel_remote_listener(
        &self,
        address: &str,
        port: u32,
    ) -> Result<(), crate::error::TunnelError> {
        self.handle
            .cancel_tcpip_forward(address.to_owned(), port)
            .await
            .map_err(crate::error::TunnelError::Ssh)?;
        Ok(())
    }

    /// Waits for the next peer-initiated stream delivered via a remote listener
    /// requested with [`Self::request_remote_listener`]. `None` once the session has
    /// closed and no more forwards will arrive.
    pub async fn accept_forwarded(
        &self,
    ) -> Option<(
        impl AsyncRead + AsyncWrite + Send + Unpin + 'static,
        ForwardedStreamParams,
    )> {
        let mut rx = self.forwarded_rx.lock().await;
        let (channel, params) = rx.recv().await?;
        Some((channel.into_stream(), params))
    }

    pub async fn close(&self) {
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await;
        self.halter.halt();
    }
}
