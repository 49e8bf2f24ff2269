//! Core elementary-stream types and the four-operation output contract.
//!
//! Everything downstream of a demuxer talks to this layer through
//! [`EsOut`]: `add` a track, `send` it timed blocks, `del` it, and issue
//! [`Control`] requests. The contract is implemented identically by the
//! direct output gateway and by the timeshift command log, so either can
//! be substituted transparently.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::Result;

mod block;
mod control;
mod format;

pub use block::Block;
pub use control::{Control, ControlOutcome, EpgNow, EsOutMode, GroupMeta, Query};
pub use format::{
    AudioParams, EsCategory, EsFormat, FourCc, VideoParams, PRIORITY_NOT_DEFAULTABLE,
    PRIORITY_NOT_SELECTABLE, PRIORITY_SELECTABLE_MIN,
};

/// Opaque handle to a registered track.
///
/// Handles are only meaningful against the [`EsOut`] instance that issued
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub(crate) u32);

impl TrackId {
    /// Raw numeric value, for logging and diagnostics.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "es#{}", self.0)
    }
}

/// The four-operation elementary-stream output contract.
pub trait EsOut: Send {
    /// Register a new track and return its handle. Never blocks.
    fn add(&mut self, fmt: EsFormat) -> Result<TrackId>;

    /// Deliver one timed block for a track. Blocks for unselected tracks
    /// are dropped by policy, not reported as errors.
    fn send(&mut self, id: TrackId, block: Block) -> Result<()>;

    /// Remove a track, tearing down its decoder if selected.
    fn del(&mut self, id: TrackId) -> Result<()>;

    /// Handle a control request.
    fn control(&mut self, cmd: Control) -> Result<ControlOutcome>;

    /// Answer a state query.
    fn query(&mut self, query: Query) -> Result<bool>;
}

/// Number of closed-caption channel slots tracked per video track.
pub const CAPTION_CHANNELS: usize = 4;

/// Wakeup handle a decoder uses to signal that it drained queued blocks.
///
/// The output gateway waits on this (bounded) when a decoder reports a
/// full queue; the condvar protocol mirrors a producer/consumer frame
/// queue.
#[derive(Clone, Default)]
pub struct DrainNotify {
    inner: Arc<(Mutex<u64>, Condvar)>,
}

impl DrainNotify {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the decoder whenever queue space becomes available.
    pub fn notify(&self) {
        let (lock, cond) = &*self.inner;
        *lock.lock() += 1;
        cond.notify_all();
    }

    /// Wait until the next drain notification or `timeout`, whichever
    /// comes first.
    pub(crate) fn wait(&self, timeout: Duration) {
        let (lock, cond) = &*self.inner;
        let mut generation = lock.lock();
        cond.wait_for(&mut generation, timeout);
    }
}

/// Per-track decoder object, created when a track becomes selected and
/// dropped when it is unselected.
pub trait Decoder: Send {
    /// Consume one block. Called with translated presentation timestamps.
    fn send(&mut self, block: Block) -> Result<()>;

    /// True while the decoder's input queue is at capacity. The gateway
    /// then waits (bounded) for a drain notification before retrying.
    fn is_full(&self) -> bool {
        false
    }

    /// Bitmask of closed-caption channels observed in decoded output so
    /// far; bit `n` set means channel `n` (0..CAPTION_CHANNELS) carries
    /// data.
    fn caption_channels(&self) -> u8 {
        0
    }

    /// Whether a given caption channel is currently being rendered.
    fn caption_active(&self, _channel: u8) -> bool {
        false
    }
}

/// Factory invoked by the gateway whenever the selection policy selects a
/// track.
pub trait DecoderFactory: Send {
    /// Create a decoder for `fmt` with its input queue bounded at
    /// `queue_depth` pending blocks. A failure leaves the track
    /// unselected; selection is not retried on the same event.
    fn create(
        &mut self,
        fmt: &EsFormat,
        drain: DrainNotify,
        queue_depth: usize,
    ) -> Result<Box<dyn Decoder>>;
}

/// Test doubles shared between unit and integration tests.
pub mod tests {
    use super::*;
    use crate::error::EsOutError;

    /// One call observed by [`RecordingEsOut`].
    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedCall {
        Add(EsFormat),
        Send(TrackId, Block),
        Del(TrackId),
        Control(Control),
    }

    /// An [`EsOut`] that records every call verbatim, for round-trip
    /// verification of the timeshift log.
    #[derive(Debug, Default)]
    pub struct RecordingEsOut {
        pub calls: Vec<RecordedCall>,
        next_id: u32,
    }

    impl RecordingEsOut {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl EsOut for RecordingEsOut {
        fn add(&mut self, fmt: EsFormat) -> Result<TrackId> {
            let id = TrackId(self.next_id);
            self.next_id += 1;
            self.calls.push(RecordedCall::Add(fmt));
            Ok(id)
        }

        fn send(&mut self, id: TrackId, block: Block) -> Result<()> {
            self.calls.push(RecordedCall::Send(id, block));
            Ok(())
        }

        fn del(&mut self, id: TrackId) -> Result<()> {
            self.calls.push(RecordedCall::Del(id));
            Ok(())
        }

        fn control(&mut self, cmd: Control) -> Result<ControlOutcome> {
            self.calls.push(RecordedCall::Control(cmd));
            Ok(ControlOutcome::Applied)
        }

        fn query(&mut self, query: Query) -> Result<bool> {
            // Same answers as an idle direct output.
            Ok(matches!(query, Query::Empty | Query::Pace))
        }
    }

    /// Lets a test keep a handle on the recorder after moving it into a
    /// proxy that takes `Box<dyn EsOut>`.
    impl EsOut for Arc<Mutex<RecordingEsOut>> {
        fn add(&mut self, fmt: EsFormat) -> Result<TrackId> {
            self.lock().add(fmt)
        }

        fn send(&mut self, id: TrackId, block: Block) -> Result<()> {
            self.lock().send(id, block)
        }

        fn del(&mut self, id: TrackId) -> Result<()> {
            self.lock().del(id)
        }

        fn control(&mut self, cmd: Control) -> Result<ControlOutcome> {
            self.lock().control(cmd)
        }

        fn query(&mut self, query: Query) -> Result<bool> {
            self.lock().query(query)
        }
    }

    /// A decoder that counts blocks and can simulate caption discovery
    /// and a full input queue.
    #[derive(Debug, Default)]
    pub struct SinkDecoder {
        pub blocks: Vec<Block>,
        pub captions: u8,
    }

    impl Decoder for SinkDecoder {
        fn send(&mut self, block: Block) -> Result<()> {
            self.blocks.push(block);
            Ok(())
        }

        fn caption_channels(&self) -> u8 {
            self.captions
        }
    }

    /// Factory producing [`SinkDecoder`]s; can be told to fail to
    /// exercise the no-retry policy.
    #[derive(Debug, Default)]
    pub struct SinkFactory {
        pub created: usize,
        pub fail: bool,
    }

    impl DecoderFactory for SinkFactory {
        fn create(
            &mut self,
            _fmt: &EsFormat,
            _drain: DrainNotify,
            _queue_depth: usize,
        ) -> Result<Box<dyn Decoder>> {
            if self.fail {
                return Err(EsOutError::Decoder("creation refused".into()));
            }
            self.created += 1;
            Ok(Box::new(SinkDecoder::default()))
        }
    }
}
