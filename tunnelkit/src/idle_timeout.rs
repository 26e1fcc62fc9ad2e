//! Wraps an SSH channel (or any duplex stream) with a deadline that auto-extends on
//! activity and fires a distinguished timeout rather than silently blocking (§4.F).

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

use crate::error::TimeoutError;

struct Shared {
    dur: Mutex<Duration>,
    expired: AtomicBool,
    // Bumped on every successful byte transfer (either direction) or `set_idle_timeout`
    // call, so a blocked poll knows to recompute its deadline from "now".
    generation: AtomicU64,
    read_waker: Mutex<Option<Waker>>,
    write_waker: Mutex<Option<Waker>>,
}

impl Shared {
    fn new(dur: Duration) -> Self {
        Self {
            dur: Mutex::new(dur),
            expired: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            read_waker: Mutex::new(None),
            write_waker: Mutex::new(None),
        }
    }

    fn duration(&self) -> Duration {
        #[allow(clippy::unwrap_used)]
        *self.dur.lock().unwrap()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn set_duration(&self, dur: Duration) {
        #[allow(clippy::unwrap_used)]
        {
            *self.dur.lock().unwrap() = dur;
        }
        self.expired.store(false, Ordering::SeqCst);
        self.bump_and_wake();
    }

    fn on_activity(&self) {
        self.bump_and_wake();
    }

    fn bump_and_wake(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        #[allow(clippy::unwrap_used)]
        if let Some(w) = self.read_waker.lock().unwrap().take() {
            w.wake();
        }
        #[allow(clippy::unwrap_used)]
        if let Some(w) = self.write_waker.lock().unwrap().take() {
            w.wake();
        }
    }
}

/// A cheap, cloneable handle to adjust or clear a channel's idle timeout from any
/// thread, including one other than whichever is currently blocked in a read or write
/// (§4.F, §5).
#[derive(Clone)]
pub struct IdleTimeoutHandle(Arc<Shared>);

impl IdleTimeoutHandle {
    /// `dur = Duration::ZERO` disables the timeout and clears any expired state,
    /// reverting a blocked operation to waiting indefinitely.
    pub fn set_idle_timeout(&self, dur: Duration) {
        self.0.set_duration(dur);
    }
}

/// Wraps `T` (typically the `AsyncRead + AsyncWrite` handle of an SSH channel) with a
/// resettable idle deadline shared across both directions.
pub struct ChannelWithIdleTimeout<T> {
    inner: T,
    shared: Arc<Shared>,
    read_timer: Option<Pin<Box<Sleep>>>,
    read_last_gen: u64,
    write_timer: Option<Pin<Box<Sleep>>>,
    write_last_gen: u64,
}

impl<T> ChannelWithIdleTimeout<T> {
    pub fn new(inner: T, idle_timeout: Duration) -> Self {
        Self {
            inner,
            shared: Arc::new(Shared::new(idle_timeout)),
            read_timer: None,
            read_last_gen: 0,
            write_timer: None,
            write_last_gen: 0,
        }
    }

    pub fn set_idle_timeout(&self, dur: Duration) {
        self.shared.set_duration(dur);
    }

    /// A cloneable handle that can outlive this value's move into, e.g., a
    /// [`crate::shovel::ShovelPair`].
    pub fn handle(&self) -> IdleTimeoutHandle {
        IdleTimeoutHandle(self.shared.clone())
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// Polls one direction's deadline. Returns `Ready(Err)` if it has expired, `Ready(Ok)`
/// if the direction should proceed to poll the underlying stream this call, or
/// `Pending` only alongside the underlying poll (both are always polled together so
/// whichever resolves first wins — see `poll_read`/`poll_write` below).
fn poll_deadline(
    cx: &mut Context<'_>,
    shared: &Shared,
    waker_slot: &Mutex<Option<Waker>>,
    timer: &mut Option<Pin<Box<Sleep>>>,
    last_gen: &mut u64,
) -> Poll<io::Result<()>> {
    #[allow(clippy::unwrap_used)]
    {
        *waker_slot.lock().unwrap() = Some(cx.waker().clone());
    }

    if shared.expired.load(Ordering::SeqCst) {
        return Poll::Ready(Err(TimeoutError.into()));
    }

    let dur = shared.duration();
    if dur.is_zero() {
        *timer = None;
        return Poll::Ready(Ok(()));
    }

    let gen = shared.generation();
    if timer.is_none() || *last_gen != gen {
        *timer = Some(Box::pin(tokio::time::sleep(dur)));
        *last_gen = gen;
    }

    #[allow(clippy::unwrap_used)]
    let fired = timer.as_mut().unwrap().as_mut().poll(cx).is_ready();
    if fired {
        shared.expired.store(true, Ordering::SeqCst);
        *timer = None;
        return Poll::Ready(Err(TimeoutError.into()));
    }

    Poll::Ready(Ok(()))
}

impl<T: AsyncRead + Unpin> AsyncRead for ChannelWithIdleTimeout<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if let Poll::Ready(Err(e)) = poll_deadline(
            cx,
            &this.shared,
            &this.shared.read_waker,
            &mut this.read_timer,
            &mut this.read_last_gen,
        ) {
            return Poll::Ready(Err(e));
        }

        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                if buf.filled().len() > before {
                    this.shared.on_activity();
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for ChannelWithIdleTimeout<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if let Poll::Ready(Err(e)) = poll_deadline(
            cx,
            &this.shared,
            &this.shared.write_waker,
            &mut this.write_timer,
            &mut this.write_last_gen,
        ) {
            return Poll::Ready(Err(e));
        }

        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                if n > 0 {
                    this.shared.on_activity();
                }
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    #[tokio::test]
    async fn simple_write_timeout_then_clears_and_succeeds() {
        let (near, far) = duplex(1); // tiny buffer: write blocks once it fills
        let mut writer = ChannelWithIdleTimeout::new(near, Duration::ZERO);
        let mut reader = far;

        // Saturate the duplex's 1-byte buffer with nobody reading, so the next write
        // actually has to block rather than completing immediately.
        writer.write_all(b"f").await.unwrap();

        writer.set_idle_timeout(Duration::from_millis(1));
        let err = writer.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        // Drain the byte left sitting in the duplex buffer so it doesn't get mistaken
        // for the start of the real message below.
        let mut drain = [0u8; 1];
        reader.read_exact(&mut drain).await.unwrap();
        assert_eq!(&drain, b"f");

        writer.set_idle_timeout(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let write_task = tokio::spawn(async move {
            writer.write_all(b"expected saluations").await.unwrap();
        });

        let mut buf = vec![0u8; "expected saluations".len()];
        timeout(Duration::from_secs(1), reader.read_exact(&mut buf))
            .await
            .expect("read timed out")
            .unwrap();
        assert_eq!(&buf, b"expected saluations");

        write_task.await.unwrap();
    }

    #[tokio::test]
    async fn simple_read_timeout_does_not_hang() {
        let (near, _far) = duplex(64);
        let mut reader = ChannelWithIdleTimeout::new(near, Duration::from_millis(2));

        let mut buf = [0u8; 16];
        let result = timeout(Duration::from_secs(100), reader.read(&mut buf)).await;
        let err = result.expect("watchdog fired, read never returned").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn read_after_clearing_timeout_gets_full_message() {
        let (near, mut far) = duplex(64);
        let mut reader = ChannelWithIdleTimeout::new(near, Duration::from_millis(2));

        let mut buf = [0u8; 16];
        let err = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        reader.set_idle_timeout(Duration::ZERO);

        let writer_task = tokio::spawn(async move {
            far.write_all(b"expected saluations").await.unwrap();
        });

        let mut buf = vec![0u8; "expected saluations".len()];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"expected saluations");

        writer_task.await.unwrap();
    }

    #[tokio::test]
    async fn no_timeout_fires_while_bytes_keep_flowing() {
        let (near, far) = duplex(64);
        let mut writer = ChannelWithIdleTimeout::new(near, Duration::from_millis(30));
        let mut reader = far;

        let writer_task = tokio::spawn(async move {
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                writer.write_all(b"a").await.unwrap();
            }
        });

        let mut buf = [0u8; 5];
        timeout(Duration::from_secs(1), reader.read_exact(&mut buf))
            .await
            .expect("unexpected timeout despite steady activity")
            .unwrap();

        writer_task.await.unwrap();
    }

    #[tokio::test]
    async fn timeout_is_distinguishable_from_eof() {
        let (near, far) = duplex(64);
        let mut reader = ChannelWithIdleTimeout::new(near, Duration::from_millis(5));
        drop(far);

        // EOF races the timeout here; both are valid depending on scheduling, but if we
        // get a timeout it must never be mistaken for EOF.
        let mut buf = [0u8; 4];
        match reader.read(&mut buf).await {
            Ok(0) => {}
            Ok(_) => panic!("unexpected data"),
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
        }
    }
}
