//! `tunnelkit tunnel`: establishes a session (§4.D) and starts every forward/reverse
//! tunnel spec given on the command line (§4.G, §4.H), then waits for Ctrl-C.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::Mutex;
use tracing::info;
use tunnelkit::{connect, Halter, TrustStore};

use crate::config::Config;

pub async fn command(config: Config, forwards: Vec<String>, reverses: Vec<String>) -> Result<()> {
    if forwards.is_empty() && reverses.is_empty() {
        bail!("nothing to do: pass at least one --forward or --reverse spec");
    }

    let trust_store = TrustStore::open(&config.trust_store_path)
        .await
        .context("opening trust store")?;
    let trust_store = Arc::new(Mutex::new(trust_store));

    let halter = Halter::new();

    let session = connect(
        &config.user,
        config.identity.as_deref(),
        config.password.clone(),
        config.totp_url.as_ref(),
        &config.sshd_host,
        config.sshd_port,
        trust_store,
        config.add_if_not_known,
        config.allow_oneshot,
        halter.clone(),
    )
    .await
    .context("establishing SSH session")?;

    if let Some((state, advisory)) = session.last_classification() {
        info!(?state, ?advisory, host = %config.sshd_host, "host key classified");
    }

    let session = Arc::new(session);
    let mut handles = Vec::new();

    for spec in &forwards {
        let (local_addr, remote_host, remote_port) = parse_forward_spec(spec)?;
        info!(%local_addr, %remote_host, remote_port, "starting forward tunnel");
        handles.push(
            tunnelkit::tunnel::start_forward(
                session.clone(),
                &local_addr,
                remote_host,
                remote_port,
                config.idle_timeout,
            )
            .await?,
        );
    }

    for spec in &reverses {
        let (remote_addr, remote_port, local_addr) = parse_reverse_spec(spec)?;
        info!(%remote_addr, remote_port, %local_addr, "starting reverse tunnel");
        handles.push(
            tunnelkit::tunnel::start_reverse(
                session.clone(),
                remote_addr,
                remote_port,
                local_addr,
                config.idle_timeout,
            )
            .await?,
        );
    }

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutting down");
    session.close().await;

    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}

/// `LOCAL_BIND_ADDR:REMOTE_HOST:REMOTE_PORT`, e.g. `127.0.0.1:8080:internal.example:80`.
fn parse_forward_spec(spec: &str) -> Result<(String, String, u32)> {
    let parts: Vec<&str> = spec.rsplitn(3, ':').collect();
    let [port, host, local_addr] = parts.as_slice() else {
        bail!("malformed --forward spec {spec:?}: expected LOCAL_BIND_ADDR:REMOTE_HOST:REMOTE_PORT");
    };
    let port: u32 = port
        .parse()
        .with_context(|| format!("malformed --forward spec {spec:?}: bad port"))?;
    Ok((local_addr.to_string(), host.to_string(), port))
}

/// `REMOTE_BIND_ADDR:REMOTE_BIND_PORT:LOCAL_HOST:LOCAL_PORT`.
fn parse_reverse_spec(spec: &str) -> Result<(String, u32, String)> {
    let parts: Vec<&str> = spec.splitn(2, "::").collect();
    let [remote_part, local_addr] = parts.as_slice() else {
        bail!(
            "malformed --reverse spec {spec:?}: expected REMOTE_BIND_ADDR:REMOTE_BIND_PORT::LOCAL_HOST:LOCAL_PORT"
        );
    };
    let (remote_addr, remote_port) = remote_part
        .rsplit_once(':')
        .with_context(|| format!("malformed --reverse spec {spec:?}: missing remote port"))?;
    let remote_port: u32 = remote_port
        .parse()
        .with_context(|| format!("malformed --reverse spec {spec:?}: bad remote port"))?;
    Ok((remote_addr.to_string(), remote_port, local_addr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_forward_spec() {
        let (local, host, port) = parse_forward_spec("127.0.0.1:8080:internal.example:80").unwrap();
        assert_eq!(local, "127.0.0.1:8080");
        assert_eq!(host, "internal.example");
        assert_eq!(port, 80);
    }

    #[test]
    fn rejects_malformed_forward_spec() {
        assert!(parse_forward_spec("not-enough-parts").is_err());
    }

    #[test]
    fn parses_reverse_spec() {
        let (remote_addr, remote_port, local) =
            parse_reverse_spec("0.0.0.0:2222::127.0.0.1:22").unwrap();
        assert_eq!(remote_addr, "0.0.0.0");
        assert_eq!(remote_port, 2222);
        assert_eq!(local, "127.0.0.1:22");
    }

    #[test]
    fn rejects_malformed_reverse_spec() {
        assert!(parse_reverse_spec("0.0.0.0:2222:127.0.0.1:22").is_err());
    }
}
