//! Time-shifting proxy over an [`EsOut`].
//!
//! In direct mode every call is forwarded immediately. The first pause
//! or off-source rate request engages delayed mode: calls are captured
//! into an ordered command log (bounded in-memory segments, payloads
//! spilled to temp files past a memory threshold) and a replay thread
//! re-issues them downstream, each at its capture date shifted by the
//! accumulated pause, rate and buffering delays. When the log drains at
//! source rate the proxy falls back to direct mode and releases the
//! thread and all segment files.

mod command;
mod segment;

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::clock::mono_now_us;
use crate::config::TimeshiftConfig;
use crate::error::{EsOutError, Result};
use crate::es::{
    Block, Control, ControlOutcome, EsCategory, EsFormat, EsOut, Query, TrackId,
};
use command::{Slot, TsBlock, TsCmd};
use segment::Segment;

/// Observer for state changes the proxy performs on its own.
pub trait TimeshiftListener: Send {
    /// Replay fell so far behind that continuing at the requested rate
    /// would need frames from the future; the proxy snapped back to the
    /// source rate.
    fn on_rate_reset(&self, _rate: f64) {}
}

struct SlotEntry {
    /// Downstream handle, bound when the Add reaches the inner output.
    real: Option<TrackId>,
    category: EsCategory,
}

struct State {
    out: Box<dyn EsOut>,
    slots: Vec<SlotEntry>,
    segments: VecDeque<Segment>,
    cmd_count: usize,
    /// Resident Send payload bytes across all segments.
    mem_bytes: usize,
    delayed: bool,
    cancelled: bool,

    paused: bool,
    pause_date: i64,
    /// Total paused time so far, accounted at each resume.
    pause_delay: i64,

    rate: f64,
    rate_source: f64,
    /// Start of the current off-source rate span.
    rate_date: i64,
    /// Delay folded in from completed rate spans.
    rate_delay: i64,

    /// Time spent waiting on the downstream output while it reported
    /// buffering.
    buffering_delay: i64,
    buffering_since: Option<i64>,

    /// Pending frame-step requests; each one lets the replay thread run
    /// ahead to the next video block while paused.
    step_frames: usize,

    /// A popped command is waiting for its deadline or executing.
    replaying: bool,

    storage_error_logged: bool,
    now: fn() -> i64,
    listener: Option<Box<dyn TimeshiftListener>>,
    cfg: TimeshiftConfig,
}

impl State {
    fn resolve(&self, id: TrackId) -> Option<TrackId> {
        self.slots.get(id.0 as usize).and_then(|s| s.real)
    }

    /// Delay applied to every capture date to get its replay deadline.
    fn total_delay(&self, now: i64) -> i64 {
        self.pause_delay + self.effective_rate_delay(now) + self.buffering_delay
    }

    fn effective_rate_delay(&self, now: i64) -> i64 {
        let mut delay = self.rate_delay;
        if self.rate != self.rate_source {
            let span = (now - self.rate_date) as f64;
            delay += (span * (self.rate_source / self.rate - 1.0)) as i64;
        }
        delay
    }

    /// Fold the running rate span into the accumulator, so the rate pair
    /// can change without losing the delay built up so far.
    fn close_rate_span(&mut self, now: i64) {
        self.rate_delay = self.effective_rate_delay(now);
        self.rate_date = now;
    }

    fn change_rate(&mut self, source: f64, rate: f64, now: i64) {
        self.close_rate_span(now);
        self.rate_source = source;
        self.rate = rate;
        self.rate_date = now;
        self.enforce_delay_floor(now);
    }

    /// A fast-forward rate must never schedule a command before its
    /// capture date. When the total delay would go negative, snap back
    /// to the source rate and clamp the total to zero.
    fn enforce_delay_floor(&mut self, now: i64) {
        if self.total_delay(now) >= 0 {
            return;
        }
        self.close_rate_span(now);
        let rate = self.rate_source;
        self.rate = rate;
        self.rate_delay = -(self.pause_delay + self.buffering_delay);
        log::warn!("playback caught up with capture; rate reset to {}", rate);
        if let Some(listener) = &self.listener {
            listener.on_rate_reset(rate);
        }
    }

    /// Append a captured command to the log. A storage failure drops
    /// this command and keeps the log going.
    fn push_cmd(&mut self, cmd: TsCmd) {
        let open_new = match self.segments.back() {
            Some(back) => back.is_sealed() || back.is_full(),
            None => true,
        };
        if open_new {
            if let Some(back) = self.segments.back_mut() {
                back.seal();
            }
            self.segments.push_back(Segment::new(
                self.cfg.segment_max_commands,
                self.cfg.segment_max_bytes,
            ));
        }
        let spill = self.mem_bytes >= self.cfg.memory_threshold;
        let back = self.segments.back_mut().unwrap();
        match back.push(cmd, spill, &self.cfg.tmp_dir) {
            Ok(mem) => {
                self.mem_bytes += mem;
                self.cmd_count += 1;
            }
            Err(err) => {
                if !self.storage_error_logged {
                    log::error!("timeshift storage failed, dropping commands: {}", err);
                    self.storage_error_logged = true;
                }
            }
        }
    }

    /// Pop the oldest command across segments, releasing drained
    /// segments (and their files) as it goes.
    fn pop_cmd(&mut self) -> Option<TsCmd> {
        loop {
            let front = self.segments.front_mut()?;
            if front.is_empty() {
                if self.segments.len() > 1 {
                    self.segments.pop_front();
                    continue;
                }
                return None;
            }
            match front.pop() {
                Ok(Some((cmd, freed))) => {
                    self.mem_bytes -= freed;
                    self.cmd_count -= 1;
                    return Some(cmd);
                }
                Ok(None) => return None,
                Err(err) => {
                    self.cmd_count = self.cmd_count.saturating_sub(1);
                    if !self.storage_error_logged {
                        log::error!("timeshift segment read failed: {}", err);
                        self.storage_error_logged = true;
                    }
                }
            }
        }
    }

    fn discard_backlog(&mut self) {
        if self.cmd_count > 0 {
            log::debug!("discarding {} queued commands", self.cmd_count);
        }
        self.segments.clear();
        self.cmd_count = 0;
        self.mem_bytes = 0;
    }

    /// Re-issue one captured command downstream. Replay failures are
    /// logged, not propagated; the producer has long since moved on.
    fn execute(&mut self, cmd: TsCmd) {
        match cmd {
            TsCmd::Add { slot, fmt, .. } => match self.out.add(fmt) {
                Ok(real) => self.slots[slot].real = Some(real),
                Err(err) => log::warn!("replayed add failed: {}", err),
            },
            TsCmd::Send { slot, block, .. } => {
                let TsBlock::Memory(block) = block else { return };
                let Some(real) = self.resolve(TrackId(slot as u32)) else {
                    log::debug!("dropping block for unbound slot {}", slot);
                    return;
                };
                let is_video = self.slots[slot].category == EsCategory::Video;
                if let Err(err) = self.out.send(real, block) {
                    log::debug!("replayed send failed: {}", err);
                }
                if is_video && self.step_frames > 0 {
                    self.step_frames -= 1;
                }
            }
            TsCmd::Del { slot, .. } => {
                if let Some(entry) = self.slots.get_mut(slot) {
                    if let Some(real) = entry.real.take() {
                        if let Err(err) = self.out.del(real) {
                            log::debug!("replayed del failed: {}", err);
                        }
                    }
                }
            }
            TsCmd::Control { cmd, .. } => {
                let mapped = if let Some(id) = cmd.track() {
                    let Some(real) = self.resolve(id) else {
                        log::debug!("dropping control for unbound {}", id);
                        return;
                    };
                    cmd.map_track(|_| real)
                } else {
                    cmd
                };
                if let Err(err) = self.out.control(mapped) {
                    log::debug!("replayed control failed: {}", err);
                }
            }
        }
    }

    /// Track the downstream buffering edge: delay accumulation starts
    /// when the inner output begins recalibrating and stops when it has
    /// a reference again.
    fn observe_buffering(&mut self, now: i64) {
        let buffering = self.out.query(Query::Buffering).unwrap_or(false);
        match (buffering, self.buffering_since) {
            (true, None) => self.buffering_since = Some(now),
            (false, Some(since)) => {
                self.buffering_delay += now - since;
                self.buffering_since = None;
            }
            _ => {}
        }
    }
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

fn replay_loop(shared: Arc<Shared>) {
    let mut st = shared.state.lock();
    loop {
        // Wait for a command that is allowed to run.
        loop {
            if st.cancelled {
                st.discard_backlog();
                return;
            }
            if st.cmd_count == 0 || (st.paused && st.step_frames == 0) {
                shared.cond.wait(&mut st);
                continue;
            }
            break;
        }
        let Some(cmd) = st.pop_cmd() else { continue };
        st.replaying = true;

        // Sleep until the command's deadline, recomputing it whenever
        // we are woken: a pause, rate change or frame step shifts it.
        loop {
            if st.cancelled {
                break;
            }
            if st.paused && st.step_frames == 0 {
                shared.cond.wait(&mut st);
                continue;
            }
            let now = (st.now)();
            if st.step_frames > 0 {
                break;
            }
            let deadline = cmd.date() + st.total_delay(now);
            if now >= deadline {
                break;
            }
            let remaining = Duration::from_micros((deadline - now) as u64);
            shared.cond.wait_for(&mut st, remaining);
        }
        if st.cancelled {
            st.discard_backlog();
            return;
        }

        st.execute(cmd);
        st.replaying = false;
        let now = (st.now)();
        st.observe_buffering(now);
        st.enforce_delay_floor(now);
        shared.cond.notify_all();
    }
}

/// [`EsOut`] proxy that can replay its input later in time.
///
/// Track handles it issues are indirection slots, stable across the
/// direct/delayed transition; the downstream ids live behind them.
pub struct Timeshift {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Timeshift {
    /// Wrap `out`. Fails if the configured temp directory is unusable,
    /// so storage problems surface at construction rather than mid-show.
    pub fn new(out: Box<dyn EsOut>, cfg: TimeshiftConfig) -> Result<Self> {
        let meta = std::fs::metadata(&cfg.tmp_dir).map_err(|err| {
            EsOutError::Storage(format!(
                "timeshift directory {}: {}",
                cfg.tmp_dir.display(),
                err
            ))
        })?;
        if !meta.is_dir() {
            return Err(EsOutError::Storage(format!(
                "timeshift directory {} is not a directory",
                cfg.tmp_dir.display()
            )));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    out,
                    slots: Vec::new(),
                    segments: VecDeque::new(),
                    cmd_count: 0,
                    mem_bytes: 0,
                    delayed: false,
                    cancelled: false,
                    paused: false,
                    pause_date: 0,
                    pause_delay: 0,
                    rate: 1.0,
                    rate_source: 1.0,
                    rate_date: 0,
                    rate_delay: 0,
                    buffering_delay: 0,
                    buffering_since: None,
                    step_frames: 0,
                    replaying: false,
                    storage_error_logged: false,
                    now: mono_now_us,
                    listener: None,
                    cfg,
                }),
                cond: Condvar::new(),
            }),
            thread: None,
        })
    }

    /// Replace the monotonic time source, for deterministic tests.
    pub fn set_time_source(&mut self, now: fn() -> i64) {
        self.shared.state.lock().now = now;
    }

    pub fn set_listener(&mut self, listener: Box<dyn TimeshiftListener>) {
        self.shared.state.lock().listener = Some(listener);
    }

    pub fn is_delayed(&self) -> bool {
        self.shared.state.lock().delayed
    }

    /// Current scheduling delay in microseconds.
    pub fn delay(&self) -> i64 {
        let st = self.shared.state.lock();
        st.total_delay((st.now)())
    }

    /// Switch to delayed mode and start the replay thread. A spawn
    /// failure is logged and the proxy stays direct.
    fn engage(&mut self) {
        {
            let mut st = self.shared.state.lock();
            if st.delayed {
                return;
            }
            st.delayed = true;
            st.rate_date = (st.now)();
        }
        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name("esout-timeshift".into())
            .spawn(move || replay_loop(shared))
        {
            Ok(handle) => {
                self.thread = Some(handle);
                log::info!("timeshift engaged");
            }
            Err(err) => {
                log::warn!("cannot start timeshift thread: {}; staying direct", err);
                self.shared.state.lock().delayed = false;
            }
        }
    }

    fn stop_thread(&mut self) {
        {
            let mut st = self.shared.state.lock();
            st.cancelled = true;
        }
        self.shared.cond.notify_all();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        let mut st = self.shared.state.lock();
        st.cancelled = false;
        st.delayed = false;
        st.discard_backlog();
        st.pause_delay = 0;
        st.rate_delay = 0;
        st.buffering_delay = 0;
        st.buffering_since = None;
        st.step_frames = 0;
        st.replaying = false;
        st.storage_error_logged = false;
    }

    /// Leave delayed mode once the log has drained at source rate with
    /// playback running. Checked on the producer path so the transition
    /// happens between calls, never under a command.
    fn try_auto_stop(&mut self) {
        let stop = {
            let st = self.shared.state.lock();
            st.cfg.auto_stop
                && st.delayed
                && !st.paused
                && st.rate == st.rate_source
                && st.cmd_count == 0
                && !st.replaying
                && st.step_frames == 0
        };
        if stop {
            self.stop_thread();
            log::info!("timeshift drained, back to direct output");
        }
    }

    fn set_pause(&mut self, paused: bool, date: i64) -> Result<ControlOutcome> {
        if paused && !self.is_delayed() {
            self.engage();
        }
        let mut st = self.shared.state.lock();
        if !st.delayed {
            // Never engaged (resume while direct, or spawn failed).
            return st.out.control(Control::SetPauseState { paused, date });
        }
        if st.paused == paused {
            return Ok(ControlOutcome::Ignored);
        }
        st.paused = paused;
        if paused {
            st.pause_date = date;
        } else {
            st.pause_delay += date - st.pause_date;
        }
        drop(st);
        self.shared.cond.notify_all();
        Ok(ControlOutcome::Applied)
    }

    fn set_rate(&mut self, source: f64, rate: f64) -> Result<ControlOutcome> {
        if rate != source && !self.is_delayed() {
            self.engage();
        }
        let mut st = self.shared.state.lock();
        let now = (st.now)();
        if st.delayed {
            st.change_rate(source, rate, now);
            drop(st);
            self.shared.cond.notify_all();
            Ok(ControlOutcome::Applied)
        } else {
            st.rate = rate;
            st.rate_source = source;
            st.rate_date = now;
            st.out.control(Control::SetRate { source, rate })
        }
    }

    fn frame_next(&mut self) -> Result<ControlOutcome> {
        let mut st = self.shared.state.lock();
        if !st.delayed || !st.paused {
            return Ok(ControlOutcome::Ignored);
        }
        st.step_frames += 1;
        drop(st);
        self.shared.cond.notify_all();
        Ok(ControlOutcome::Applied)
    }
}

impl EsOut for Timeshift {
    fn add(&mut self, fmt: EsFormat) -> Result<TrackId> {
        self.try_auto_stop();
        let mut st = self.shared.state.lock();
        let slot: Slot = st.slots.len();
        st.slots.push(SlotEntry {
            real: None,
            category: fmt.category,
        });
        if st.delayed {
            let date = (st.now)();
            st.push_cmd(TsCmd::Add { slot, fmt, date });
            drop(st);
            self.shared.cond.notify_all();
        } else {
            match st.out.add(fmt) {
                Ok(real) => st.slots[slot].real = Some(real),
                Err(err) => {
                    st.slots.pop();
                    return Err(err);
                }
            }
        }
        Ok(TrackId(slot as u32))
    }

    fn send(&mut self, id: TrackId, block: Block) -> Result<()> {
        self.try_auto_stop();
        let mut st = self.shared.state.lock();
        let slot = id.0 as usize;
        if slot >= st.slots.len() {
            return Err(EsOutError::UnknownTrack(id.raw()));
        }
        if st.delayed {
            let date = (st.now)();
            st.push_cmd(TsCmd::Send {
                slot,
                block: TsBlock::Memory(block),
                date,
            });
            drop(st);
            self.shared.cond.notify_all();
            Ok(())
        } else {
            let real = st
                .resolve(id)
                .ok_or(EsOutError::UnknownTrack(id.raw()))?;
            st.out.send(real, block)
        }
    }

    fn del(&mut self, id: TrackId) -> Result<()> {
        self.try_auto_stop();
        let mut st = self.shared.state.lock();
        let slot = id.0 as usize;
        if slot >= st.slots.len() {
            return Err(EsOutError::UnknownTrack(id.raw()));
        }
        if st.delayed {
            let date = (st.now)();
            st.push_cmd(TsCmd::Del { slot, date });
            drop(st);
            self.shared.cond.notify_all();
            Ok(())
        } else {
            let real = st
                .resolve(id)
                .ok_or(EsOutError::UnknownTrack(id.raw()))?;
            st.out.del(real)?;
            st.slots[slot].real = None;
            Ok(())
        }
    }

    fn control(&mut self, cmd: Control) -> Result<ControlOutcome> {
        self.try_auto_stop();
        match cmd {
            Control::SetPauseState { paused, date } => self.set_pause(paused, date),
            Control::SetRate { source, rate } => self.set_rate(source, rate),
            Control::FrameNext => self.frame_next(),
            Control::SetTime(_) if self.is_delayed() => Err(EsOutError::InvalidData(
                "cannot seek while a timeshift log is live".into(),
            )),
            other => {
                let mut st = self.shared.state.lock();
                if st.delayed {
                    let date = (st.now)();
                    st.push_cmd(TsCmd::Control { cmd: other, date });
                    drop(st);
                    self.shared.cond.notify_all();
                    Ok(ControlOutcome::Applied)
                } else {
                    let mapped = if let Some(id) = other.track() {
                        let real = st
                            .resolve(id)
                            .ok_or(EsOutError::UnknownTrack(id.raw()))?;
                        other.map_track(|_| real)
                    } else {
                        other
                    };
                    st.out.control(mapped)
                }
            }
        }
    }

    fn query(&mut self, query: Query) -> Result<bool> {
        let mut st = self.shared.state.lock();
        match query {
            Query::Empty => {
                Ok(st.cmd_count == 0 && !st.replaying && st.out.query(Query::Empty)?)
            }
            Query::Buffering => st.out.query(Query::Buffering),
            // While delayed, the proxy consumes at its own pace and the
            // producer must not throttle itself.
            Query::Pace => {
                if st.delayed {
                    Ok(false)
                } else {
                    st.out.query(Query::Pace)
                }
            }
        }
    }
}

impl Drop for Timeshift {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop_thread();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::es::tests::RecordingEsOut;
    use crate::es::FourCc;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicI64, Ordering};

    static NOW: AtomicI64 = AtomicI64::new(0);
    // Serializes tests that assert on specific NOW values.
    static CLOCK_GUARD: Mutex<()> = Mutex::new(());

    fn frozen_now() -> i64 {
        NOW.load(Ordering::SeqCst)
    }

    fn video_fmt() -> EsFormat {
        EsFormat::video(FourCc::new(b"h264"))
    }

    fn shift(cfg: TimeshiftConfig) -> Timeshift {
        let mut ts = Timeshift::new(Box::new(RecordingEsOut::new()), cfg).unwrap();
        ts.set_time_source(frozen_now);
        ts
    }

    fn small_cfg(dir: &std::path::Path) -> TimeshiftConfig {
        TimeshiftConfig {
            tmp_dir: dir.to_path_buf(),
            auto_stop: false,
            ..TimeshiftConfig::default()
        }
    }

    #[test]
    fn test_direct_mode_forwards_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut ts = shift(small_cfg(dir.path()));
        let id = ts.add(video_fmt()).unwrap();
        ts.send(id, Block::new(vec![1u8, 2, 3])).unwrap();
        assert!(!ts.is_delayed());
        assert!(ts.query(Query::Empty).unwrap());
    }

    #[test]
    fn test_full_segment_is_sealed_and_new_one_opened() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = small_cfg(dir.path());
        cfg.segment_max_commands = 2;
        let mut ts = shift(cfg);
        let id = ts.add(video_fmt()).unwrap();
        ts.control(Control::SetPauseState {
            paused: true,
            date: 0,
        })
        .unwrap();
        for i in 0..3u8 {
            ts.send(id, Block::new(vec![i])).unwrap();
        }
        let mut st = ts.shared.state.lock();
        assert_eq!(st.segments.len(), 2);
        assert!(st.segments[0].is_sealed());
        assert!(!st.segments[1].is_sealed());
        assert_eq!(st.cmd_count, 3);

        // Draining must cross the segment boundary without losing order.
        for i in 0..3u8 {
            let cmd = st.pop_cmd().expect("command lost at segment boundary");
            let TsCmd::Send {
                block: TsBlock::Memory(block),
                ..
            } = cmd
            else {
                panic!("expected a send command");
            };
            assert_eq!(block.data.as_ref(), &[i]);
        }
        assert!(st.pop_cmd().is_none());
        assert_eq!(st.cmd_count, 0);
    }

    #[test]
    fn test_pause_delay_accounted_at_resume() {
        let dir = tempfile::tempdir().unwrap();
        let mut ts = shift(small_cfg(dir.path()));
        ts.control(Control::SetPauseState {
            paused: true,
            date: 100,
        })
        .unwrap();
        assert!(ts.is_delayed());
        assert_eq!(ts.shared.state.lock().pause_delay, 0);
        // Repeated pause is a no-op, not a second span.
        let outcome = ts
            .control(Control::SetPauseState {
                paused: true,
                date: 102,
            })
            .unwrap();
        assert_eq!(outcome, ControlOutcome::Ignored);
        ts.control(Control::SetPauseState {
            paused: false,
            date: 105,
        })
        .unwrap();
        assert_eq!(ts.shared.state.lock().pause_delay, 5);
    }

    #[test]
    fn test_rate_change_and_reversal_is_net_zero() {
        let _clock = CLOCK_GUARD.lock();
        let dir = tempfile::tempdir().unwrap();
        let mut ts = shift(small_cfg(dir.path()));
        NOW.store(0, Ordering::SeqCst);
        // Keep the replay thread idle so accumulators stay untouched.
        ts.control(Control::SetPauseState {
            paused: true,
            date: 0,
        })
        .unwrap();
        NOW.store(1_000, Ordering::SeqCst);
        ts.control(Control::SetRate {
            source: 1.0,
            rate: 0.5,
        })
        .unwrap();
        // Half speed for 10ms of wall time owes 10ms of extra delay.
        NOW.store(11_000, Ordering::SeqCst);
        {
            let st = ts.shared.state.lock();
            assert_eq!(st.effective_rate_delay(11_000), 10_000);
        }
        ts.control(Control::SetRate {
            source: 1.0,
            rate: 1.0,
        })
        .unwrap();
        // Back at source rate the span is closed and stops growing.
        NOW.store(50_000, Ordering::SeqCst);
        let st = ts.shared.state.lock();
        assert_eq!(st.effective_rate_delay(50_000), 10_000);
    }

    #[test]
    fn test_fast_forward_past_live_resets_rate() {
        struct Flag(Arc<AtomicI64>);
        impl TimeshiftListener for Flag {
            fn on_rate_reset(&self, rate: f64) {
                self.0.store(rate as i64, Ordering::SeqCst);
            }
        }
        let _clock = CLOCK_GUARD.lock();
        let dir = tempfile::tempdir().unwrap();
        let mut ts = shift(small_cfg(dir.path()));
        NOW.store(0, Ordering::SeqCst);
        let seen = Arc::new(AtomicI64::new(0));
        ts.set_listener(Box::new(Flag(Arc::clone(&seen))));
        ts.control(Control::SetPauseState {
            paused: true,
            date: 0,
        })
        .unwrap();
        NOW.store(0, Ordering::SeqCst);
        ts.control(Control::SetRate {
            source: 1.0,
            rate: 2.0,
        })
        .unwrap();
        // 2x for 10ms would owe -5ms with no delay banked; the floor
        // snaps the rate back to source and clamps the total to zero.
        NOW.store(10_000, Ordering::SeqCst);
        ts.control(Control::SetRate {
            source: 1.0,
            rate: 2.0,
        })
        .unwrap();
        let st = ts.shared.state.lock();
        assert_eq!(st.rate, st.rate_source);
        assert_eq!(st.total_delay(10_000), 0);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_time_rejected_while_delayed() {
        let dir = tempfile::tempdir().unwrap();
        let mut ts = shift(small_cfg(dir.path()));
        assert!(ts.control(Control::SetTime(1_000)).is_ok());
        ts.control(Control::SetPauseState {
            paused: true,
            date: 0,
        })
        .unwrap();
        assert!(matches!(
            ts.control(Control::SetTime(2_000)),
            Err(EsOutError::InvalidData(_))
        ));
    }

    #[test]
    fn test_frame_next_requires_pause() {
        let dir = tempfile::tempdir().unwrap();
        let mut ts = shift(small_cfg(dir.path()));
        assert_eq!(
            ts.control(Control::FrameNext).unwrap(),
            ControlOutcome::Ignored
        );
        ts.control(Control::SetPauseState {
            paused: true,
            date: 0,
        })
        .unwrap();
        assert_eq!(
            ts.control(Control::FrameNext).unwrap(),
            ControlOutcome::Applied
        );
    }

    #[test]
    fn test_spill_engages_past_memory_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = small_cfg(dir.path());
        cfg.memory_threshold = 4;
        let mut ts = shift(cfg);
        let id = ts.add(video_fmt()).unwrap();
        ts.control(Control::SetPauseState {
            paused: true,
            date: 0,
        })
        .unwrap();
        ts.send(id, Block::new(vec![0u8; 4])).unwrap();
        ts.send(id, Block::new(vec![1u8; 4])).unwrap();
        let st = ts.shared.state.lock();
        // First block stays resident, second spilled at the threshold.
        assert_eq!(st.mem_bytes, 4);
        assert_eq!(st.cmd_count, 2);
    }
}
