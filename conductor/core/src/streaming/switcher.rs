//! Stream Switcher Implementation
//!
//! One long-lived downstream stream in front of a sequence of upstream
//! sources. Each installed source gets a pump task that forwards its chunks
//! into a single-slot channel; the downstream reads that channel.

use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

// ============================================================================
// Types
// ============================================================================

/// Errors surfaced by the switcher, both to its caller and downstream
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SwitchError {
    /// Another switch would exceed the configured maximum
    #[error("Switch budget exhausted after {max} switches")]
    BudgetExceeded {
        /// Configured maximum
        max: u32,
    },
    /// The upstream producer failed mid-stream
    #[error("Upstream failed: {0}")]
    Upstream(String),
    /// The downstream has already been closed
    #[error("Stream switcher is closed")]
    Closed,
}

/// An upstream byte producer
pub type ByteSource = BoxStream<'static, Result<Bytes, SwitchError>>;

type Chunk = Result<Bytes, SwitchError>;

/// Read-only view of a switcher's replacement count
#[derive(Clone, Debug, Default)]
pub struct SwitchCount(Arc<AtomicU32>);

impl SwitchCount {
    /// Replacements performed so far
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

// ============================================================================
// Switcher
// ============================================================================

/// Owns the active upstream source and feeds the downstream
///
/// The initial source is installed by [`StreamSwitcher::new`] and does not
/// count as a switch.
pub struct StreamSwitcher {
    tx: Option<mpsc::Sender<Chunk>>,
    pump: Option<JoinHandle<()>>,
    switches: SwitchCount,
    max_switches: u32,
}

impl StreamSwitcher {
    /// Install `initial` and create the downstream endpoint
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn new(initial: ByteSource, max_switches: u32) -> (Self, SwitchedStream) {
        // One slot: at most the in-transit chunk is buffered
        let (tx, rx) = mpsc::channel(1);
        let pump = spawn_pump(initial, tx.clone());

        let switcher = Self {
            tx: Some(tx),
            pump: Some(pump),
            switches: SwitchCount::default(),
            max_switches,
        };
        (switcher, SwitchedStream { rx, done: false })
    }

    /// Replacements performed so far
    #[must_use]
    pub fn switches(&self) -> u32 {
        self.switches.get()
    }

    /// Shared handle to the replacement count
    #[must_use]
    pub fn switch_count(&self) -> SwitchCount {
        self.switches.clone()
    }

    /// Configured maximum number of replacements
    #[must_use]
    pub fn max_switches(&self) -> u32 {
        self.max_switches
    }

    /// Replacements still allowed
    #[must_use]
    pub fn switches_left(&self) -> u32 {
        self.max_switches.saturating_sub(self.switches())
    }

    /// Whether the downstream has been closed by this switcher
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// Whether nobody is reading the downstream any more
    #[must_use]
    pub fn is_downstream_dropped(&self) -> bool {
        self.tx.as_ref().map_or(true, mpsc::Sender::is_closed)
    }

    /// Install `source` as the active upstream
    ///
    /// A previous source that is still producing is abandoned and its read
    /// cancelled; call [`StreamSwitcher::drain`] first to keep its output.
    ///
    /// # Errors
    ///
    /// - [`SwitchError::Closed`] after [`StreamSwitcher::close`]
    /// - [`SwitchError::BudgetExceeded`] when the maximum has been reached;
    ///   the downstream then ends with the same error
    pub async fn switch_source(&mut self, source: ByteSource) -> Result<(), SwitchError> {
        let Some(tx) = self.tx.clone() else {
            return Err(SwitchError::Closed);
        };

        let performed = self.switches();
        if performed >= self.max_switches {
            let err = SwitchError::BudgetExceeded {
                max: self.max_switches,
            };
            error!(switches = performed, max = self.max_switches, "Switch budget exhausted");
            self.fail(err.clone()).await;
            return Err(err);
        }

        if let Some(pump) = self.pump.take() {
            if !pump.is_finished() {
                warn!(switches = performed, "Abandoning upstream source that is still producing");
                pump.abort();
            }
            // Wait for the abort so the old pump can no longer send
            let _ = pump.await;
        }

        self.pump = Some(spawn_pump(source, tx));
        let now = self.switches.0.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(switches = now, max = self.max_switches, "Upstream source switched");
        Ok(())
    }

    /// Wait until the active source has been fully forwarded
    ///
    /// The downstream stays open.
    pub async fn drain(&mut self) {
        let Some(pump) = self.pump.take() else {
            return;
        };
        if let Err(e) = pump.await {
            if e.is_panic() {
                warn!(error = %e, "Upstream pump panicked");
            }
        }
    }

    /// End the downstream after the active source is drained
    ///
    /// Idempotent.
    pub async fn close(&mut self) {
        if self.tx.is_none() {
            return;
        }
        self.drain().await;
        self.tx = None;
        debug!(switches = self.switches(), "Downstream closed");
    }

    /// Drain, then end the downstream with `err`
    ///
    /// Does nothing if already closed.
    pub async fn fail(&mut self, err: SwitchError) {
        if self.tx.is_none() {
            return;
        }
        self.drain().await;
        if let Some(tx) = self.tx.take() {
            if tx.send(Err(err)).await.is_err() {
                debug!("Downstream dropped before the failure could be delivered");
            }
        }
    }
}

impl std::fmt::Debug for StreamSwitcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSwitcher")
            .field("switches", &self.switches())
            .field("max_switches", &self.max_switches)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Forward one source into the downstream channel
///
/// Stops after the first error, or as soon as the downstream is gone, even
/// while waiting on a stalled source. Returning drops, and so cancels, the
/// source.
fn spawn_pump(mut source: ByteSource, tx: mpsc::Sender<Chunk>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let item = tokio::select! {
                item = source.next() => item,
                () = tx.closed() => {
                    debug!("Downstream dropped, cancelling upstream read");
                    return;
                }
            };
            let Some(item) = item else {
                return;
            };
            let failed = item.is_err();
            if tx.send(item).await.is_err() {
                debug!("Downstream dropped, cancelling upstream read");
                return;
            }
            if failed {
                return;
            }
        }
    })
}

// ============================================================================
// Downstream
// ============================================================================

/// The single downstream endpoint of a [`StreamSwitcher`]
///
/// Yields chunks in production order across all sources and ends after the
/// switcher closes or after the first error.
#[derive(Debug)]
pub struct SwitchedStream {
    rx: mpsc::Receiver<Chunk>,
    done: bool,
}

impl Stream for SwitchedStream {
    type Item = Result<Bytes, SwitchError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Err(e))) => {
                self.done = true;
                self.rx.close();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use pretty_assertions::assert_eq;

    fn source(chunks: &[&'static str]) -> ByteSource {
        stream::iter(
            chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    async fn collect(downstream: SwitchedStream) -> (String, Option<SwitchError>) {
        let mut text = String::new();
        let mut failure = None;
        let items: Vec<_> = downstream.collect().await;
        for item in items {
            match item {
                Ok(bytes) => text.push_str(std::str::from_utf8(&bytes).unwrap()),
                Err(e) => failure = Some(e),
            }
        }
        (text, failure)
    }

    #[tokio::test]
    async fn test_single_source_then_close() {
        let (mut switcher, downstream) = StreamSwitcher::new(source(&["a", "b", "c"]), 2);
        let reader = tokio::spawn(collect(downstream));

        switcher.close().await;
        switcher.close().await;

        let (text, failure) = reader.await.unwrap();
        assert_eq!(text, "abc");
        assert_eq!(failure, None);
        assert_eq!(switcher.switches(), 0);
        assert!(switcher.is_closed());
    }

    #[tokio::test]
    async fn test_drained_switches_preserve_order() {
        let (mut switcher, downstream) = StreamSwitcher::new(source(&["one ", "two "]), 3);
        let reader = tokio::spawn(collect(downstream));

        for chunks in [&["three ", "four "][..], &["five"][..]] {
            switcher.drain().await;
            switcher.switch_source(source(chunks)).await.unwrap();
        }
        switcher.close().await;

        let (text, failure) = reader.await.unwrap();
        assert_eq!(text, "one two three four five");
        assert_eq!(failure, None);
        assert_eq!(switcher.switches(), 2);
        assert_eq!(switcher.switches_left(), 1);
    }

    #[tokio::test]
    async fn test_budget_exceeded_on_extra_switch() {
        let max = 3;
        let (mut switcher, downstream) = StreamSwitcher::new(source(&[]), max);
        let reader = tokio::spawn(collect(downstream));

        for _ in 0..max {
            switcher.drain().await;
            assert!(switcher.switch_source(source(&["x"])).await.is_ok());
        }
        let result = switcher.switch_source(source(&["never"])).await;
        assert_eq!(result, Err(SwitchError::BudgetExceeded { max }));
        assert_eq!(switcher.switches(), max);

        let (text, failure) = reader.await.unwrap();
        assert_eq!(text, "xxx");
        assert_eq!(failure, Some(SwitchError::BudgetExceeded { max }));
    }

    #[tokio::test]
    async fn test_switch_after_close_fails() {
        let (mut switcher, _downstream) = StreamSwitcher::new(source(&[]), 5);
        switcher.close().await;

        let result = switcher.switch_source(source(&["late"])).await;
        assert_eq!(result, Err(SwitchError::Closed));
        assert_eq!(switcher.switches(), 0);
    }

    #[tokio::test]
    async fn test_upstream_error_ends_downstream() {
        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(SwitchError::Upstream("connection reset".to_string())),
            Ok(Bytes::from_static(b"unreachable")),
        ])
        .boxed();
        let (mut switcher, downstream) = StreamSwitcher::new(failing, 1);
        let reader = tokio::spawn(collect(downstream));

        switcher.close().await;

        let (text, failure) = reader.await.unwrap();
        assert_eq!(text, "partial");
        assert_eq!(
            failure,
            Some(SwitchError::Upstream("connection reset".to_string()))
        );
    }

    #[tokio::test]
    async fn test_abandons_live_source() {
        let (live_tx, live_rx) = mpsc::channel::<Chunk>(4);
        let live = tokio_stream::wrappers::ReceiverStream::new(live_rx).boxed();
        let (mut switcher, mut downstream) = StreamSwitcher::new(live, 1);

        live_tx.send(Ok(Bytes::from_static(b"first"))).await.unwrap();
        assert_eq!(
            downstream.next().await,
            Some(Ok(Bytes::from_static(b"first")))
        );

        switcher.switch_source(source(&["second"])).await.unwrap();
        // The abandoned source was dropped along with its pump
        assert!(live_tx.send(Ok(Bytes::from_static(b"lost"))).await.is_err());
        switcher.close().await;

        let (text, _) = collect(downstream).await;
        assert_eq!(text, "second");
    }

    #[tokio::test]
    async fn test_dropped_downstream_cancels_source() {
        let (live_tx, live_rx) = mpsc::channel::<Chunk>(1);
        let live = tokio_stream::wrappers::ReceiverStream::new(live_rx).boxed();
        let (mut switcher, downstream) = StreamSwitcher::new(live, 1);

        drop(downstream);
        assert!(switcher.is_downstream_dropped());

        // Nothing is sent: the pump is parked on the silent source
        switcher.drain().await;
        assert!(live_tx.is_closed());
    }

    #[tokio::test]
    async fn test_switch_count_handle_is_shared() {
        let (mut switcher, downstream) = StreamSwitcher::new(source(&[]), 2);
        let count = switcher.switch_count();
        let reader = tokio::spawn(collect(downstream));

        switcher.switch_source(source(&[])).await.unwrap();
        assert_eq!(count.get(), 1);
        switcher.close().await;
        reader.await.unwrap();
    }
}
