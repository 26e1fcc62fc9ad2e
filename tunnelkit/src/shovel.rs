//! Two one-way byte pumps sharing a joint shutdown signal (§4.E).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const BUF_SIZE: usize = 16 * 1024;

/// A bidirectional pipe between two streams, composed of two independent one-way pumps
/// (`A->B` and `B->A`) that share a single `done` signal.
///
/// Closing either underlying stream, or calling [`Self::stop`], terminates both pumps
/// within a bounded time; no pump outlives the pair; [`Self::start`] may be called at
/// most once (§3, §4.E).
pub struct ShovelPair {
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
    handles: Option<(JoinHandle<()>, JoinHandle<()>)>,
}

impl Default for ShovelPair {
    fn default() -> Self {
        Self::new()
    }
}

impl ShovelPair {
    pub fn new() -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            done_tx,
            done_rx,
            handles: None,
        }
    }

    /// Spawns both pumps and returns immediately. Panics if called more than once on the
    /// same pair (§4.E invariant).
    pub fn start<A, B>(
        &mut self,
        stream_a: A,
        stream_b: B,
        label_ab: impl Into<String>,
        label_ba: impl Into<String>,
    ) where
        A: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        B: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        assert!(self.handles.is_none(), "ShovelPair::start called more than once");

        let (a_read, a_write) = tokio::io::split(stream_a);
        let (b_read, b_write) = tokio::io::split(stream_b);

        let h1 = tokio::spawn(pump(a_read, b_write, label_ab.into(), self.done_tx.clone(), self.done_rx.clone()));
        let h2 = tokio::spawn(pump(b_read, a_write, label_ba.into(), self.done_tx.clone(), self.done_rx.clone()));

        self.handles = Some((h1, h2));
    }

    /// Raises the `done` signal and returns without waiting for the pumps to exit.
    /// Idempotent — tolerates being called after the pair has already stopped itself.
    pub fn stop(&self) {
        let _ = self.done_tx.send(true);
    }

    /// Waits for both pumps to exit. Used by graceful teardown paths and by tests that
    /// check for task leaks (§8).
    pub async fn wait(&mut self) {
        if let Some((h1, h2)) = self.handles.take() {
            let _ = tokio::join!(h1, h2);
        }
    }
}

impl Drop for ShovelPair {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    label: String,
    done_tx: watch::Sender<bool>,
    mut done_rx: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUF_SIZE];

    loop {
        tokio::select! {
            biased;
            changed = done_rx.changed() => {
                if changed.is_err() || *done_rx.borrow() {
                    debug!(%label, "shovel stopped");
                    break;
                }
            }
            result = reader.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!(%label, "EOF on source");
                        break;
                    }
                    Ok(n) => {
                        if let Err(error) = writer.write_all(&buf[..n]).await {
                            warn!(%label, ?error, "write error, stopping shovel");
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(%label, ?error, "read error, stopping shovel");
                        break;
                    }
                }
            }
        }
    }

    let _ = done_tx.send(true);
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    #[tokio::test]
    async fn bytes_flow_in_order_until_sender_closes() {
        let (a_near, a_far) = duplex(64);
        let (b_near, b_far) = duplex(64);

        let mut pair = ShovelPair::new();
        pair.start(a_far, b_far, "a->b", "b->a");

        let mut a_near = a_near;
        let mut b_near = b_near;

        a_near.write_all(b"hello, shovel").await.unwrap();
        let mut buf = [0u8; 13];
        b_near.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello, shovel");

        drop(a_near);

        let mut rest = Vec::new();
        b_near.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        tokio::time::timeout(Duration::from_secs(1), pair.wait())
            .await
            .expect("pumps did not exit in time");
    }

    #[tokio::test]
    async fn stop_terminates_both_pumps_without_task_leak() {
        let (a_near, a_far) = duplex(64);
        let (b_near, b_far) = duplex(64);
        let _keep_alive = (a_near, b_near);

        let mut pair = ShovelPair::new();
        pair.start(a_far, b_far, "a->b", "b->a");

        pair.stop();

        tokio::time::timeout(Duration::from_secs(1), pair.wait())
            .await
            .expect("pumps did not exit after stop()");
    }

    #[tokio::test]
    async fn start_may_only_be_called_once() {
        let (_, a_far) = duplex(64);
        let (_, b_far) = duplex(64);
        let mut pair = ShovelPair::new();
        pair.start(a_far, b_far, "a->b", "b->a");

        let (_, a_far2) = duplex(64);
        let (_, b_far2) = duplex(64);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pair.start(a_far2, b_far2, "a->b", "b->a");
        }));
        assert!(result.is_err());
    }
}
