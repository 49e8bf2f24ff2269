//! Output gateway: the direct implementation of [`EsOut`].
//!
//! Applies category delays, clock translation and rate scaling to
//! outgoing blocks, dispatches them to per-track decoders with bounded
//! backpressure, drives the selection policy, and derives closed-caption
//! sub-tracks from decoded video output.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::clock::mono_now_us;
use crate::config::Config;
use crate::error::{EsOutError, Result};
use crate::es::{
    Block, Control, ControlOutcome, DecoderFactory, DrainNotify, EsCategory, EsFormat, EsOut,
    FourCc, Query, TrackId, CAPTION_CHANNELS, PRIORITY_NOT_DEFAULTABLE,
};
use crate::policy::SelectionPolicy;
use crate::registry::EsRegistry;

/// Playback-rate window inside which audio blocks are still forwarded;
/// outside it they are dropped rather than queued.
const AUDIO_RATE_MIN: f64 = 0.25;
const AUDIO_RATE_MAX: f64 = 4.0;

/// Upper bound on the time the producer may spend waiting for a full
/// decoder queue to drain before the block is dropped.
const MAX_BLOCK_WAIT: Duration = Duration::from_millis(400);

/// Granularity of one drain wait.
const BLOCK_WAIT_SLICE: Duration = Duration::from_millis(40);

/// The direct elementary-stream output path.
pub struct EsOutGateway {
    registry: EsRegistry,
    policy: SelectionPolicy,
    factory: Box<dyn DecoderFactory>,
    drain: DrainNotify,
    /// Extra presentation delay per category, microseconds.
    delays: HashMap<EsCategory, i64>,
    /// Pending-block bound handed to created decoders.
    queue_depth: usize,
    rate: f64,
    source_rate: f64,
    paused: bool,
    /// Last absolute source time reported through `SetTime`.
    absolute_time: Option<i64>,
    now: fn() -> i64,
}

impl EsOutGateway {
    pub fn new(config: &Config, factory: Box<dyn DecoderFactory>) -> Self {
        let mut policy = SelectionPolicy::new(
            config.mode.clone(),
            config.audio_language.clone(),
            config.subtitle_language.clone(),
        );
        policy.set_category_enabled(EsCategory::Video, config.video_enabled);
        policy.set_category_enabled(EsCategory::Audio, config.audio_enabled);
        policy.set_category_enabled(EsCategory::Subtitle, config.subtitle_enabled);
        Self {
            registry: EsRegistry::new(),
            policy,
            factory,
            drain: DrainNotify::new(),
            delays: HashMap::new(),
            queue_depth: config.decoder_queue_depth,
            rate: 1.0,
            source_rate: 1.0,
            paused: false,
            absolute_time: None,
            now: mono_now_us,
        }
    }

    /// Replace the monotonic time source; for deterministic tests.
    pub fn set_time_source(&mut self, now: fn() -> i64) {
        self.now = now;
    }

    /// Drain-notification handle to hand to decoders created outside the
    /// factory path.
    pub fn drain_notify(&self) -> DrainNotify {
        self.drain.clone()
    }

    pub fn registry(&self) -> &EsRegistry {
        &self.registry
    }

    /// Last absolute source time reported through `SetTime`, for position
    /// display.
    pub fn absolute_time(&self) -> Option<i64> {
        self.absolute_time
    }

    /// Producer pace and requested playback rate.
    pub fn rates(&self) -> (f64, f64) {
        (self.source_rate, self.rate)
    }

    /// True while any program owning tracks is still waiting for its
    /// first calibrated PCR.
    fn is_buffering(&self) -> bool {
        self.registry.tracks_in_order().any(|t| {
            self.registry
                .program(t.group)
                .map(|p| !p.clock.has_reference())
                .unwrap_or(false)
        })
    }

    /// Re-evaluate selection for one category and apply the decision.
    fn reselect(&mut self, category: EsCategory) {
        let wanted = self.policy.wanted(&self.registry, category);
        let selected: Vec<TrackId> = self
            .registry
            .tracks_in_order()
            .filter(|t| t.category() == category && t.decoder.is_some())
            .map(|t| t.id)
            .collect();

        // Unselect before selecting, so a switch never runs two decoders
        // for a single-selection category.
        for id in &selected {
            if !wanted.contains(id) {
                self.unselect(*id);
            }
        }
        let mut active = None;
        for id in &wanted {
            if self.registry.track(*id).map(|t| t.decoder.is_some()) == Some(true) {
                active = active.or(Some(*id));
                continue;
            }
            if self.select(*id) {
                active = active.or(Some(*id));
            }
        }
        self.policy.note_current(category, active);
    }

    fn reselect_all(&mut self) {
        for category in [EsCategory::Video, EsCategory::Audio, EsCategory::Subtitle] {
            self.reselect(category);
        }
    }

    /// Create a decoder for a track. A factory failure leaves the track
    /// unselected and is not retried on this event.
    fn select(&mut self, id: TrackId) -> bool {
        let Some(track) = self.registry.track(id) else {
            return false;
        };
        if track.decoder.is_some() {
            return true;
        }
        if track.is_caption_child() {
            // Caption children render through their parent's decoder.
            return true;
        }
        let fmt = track.fmt.clone();
        match self.factory.create(&fmt, self.drain.clone(), self.queue_depth) {
            Ok(decoder) => {
                log::info!("selecting {} ({} {})", id, fmt.category, fmt.codec);
                self.registry.track_mut(id).unwrap().decoder = Some(decoder);
                true
            }
            Err(err) => {
                log::warn!("decoder creation failed for {}: {}", id, err);
                false
            }
        }
    }

    /// Tear down a track's decoder and any caption children it spawned.
    fn unselect(&mut self, id: TrackId) {
        let children: Vec<TrackId> = match self.registry.track_mut(id) {
            Some(track) if track.decoder.is_some() => {
                log::info!("unselecting {}", id);
                track.decoder = None;
                track.captions.iter().flatten().copied().collect()
            }
            _ => return,
        };
        // Caption sub-tracks never outlive the parent decoder.
        for child in children {
            if let Ok(removed) = self.registry.remove_track(child) {
                for track in removed {
                    self.policy.forget(track.id);
                }
            }
        }
    }

    /// Synthesize subtitle tracks for caption channels newly observed on
    /// a video track's decoder.
    fn derive_captions(&mut self, parent: TrackId) {
        let Some(track) = self.registry.track(parent) else {
            return;
        };
        let Some(decoder) = &track.decoder else {
            return;
        };
        let mask = decoder.caption_channels();
        if mask == 0 {
            return;
        }
        let group = track.group;
        let known = track.captions;

        let mut announced = false;
        for channel in 0..CAPTION_CHANNELS as u8 {
            if mask & (1 << channel) == 0 || known[channel as usize].is_some() {
                continue;
            }
            let codec = FourCc([b'c', b'c', b'1' + channel, b' ']);
            let fmt = EsFormat::subtitle(codec)
                .with_group(group)
                .with_priority(PRIORITY_NOT_DEFAULTABLE);
            match self.registry.add_track(fmt) {
                Ok(child) => {
                    log::info!(
                        "detected caption channel {} on {}, announcing {}",
                        channel + 1,
                        parent,
                        child
                    );
                    let child_track = self.registry.track_mut(child).unwrap();
                    child_track.caption_master = Some((parent, channel));
                    self.registry.track_mut(parent).unwrap().captions[channel as usize] =
                        Some(child);
                    announced = true;
                }
                Err(err) => log::warn!("cannot announce caption channel: {}", err),
            }
        }
        if announced {
            self.reselect(EsCategory::Subtitle);
        }
    }

    /// Wait (bounded) for a full decoder queue to drain. Returns false if
    /// the queue is still full after the bound, in which case the block
    /// is dropped by policy.
    fn wait_for_queue_space(&mut self, id: TrackId) -> bool {
        let start = Instant::now();
        loop {
            let full = self
                .registry
                .track(id)
                .and_then(|t| t.decoder.as_ref())
                .map(|d| d.is_full())
                .unwrap_or(false);
            if !full {
                return true;
            }
            if start.elapsed() >= MAX_BLOCK_WAIT {
                return false;
            }
            self.drain.wait(BLOCK_WAIT_SLICE);
        }
    }
}

impl EsOut for EsOutGateway {
    fn add(&mut self, fmt: EsFormat) -> Result<TrackId> {
        let category = fmt.category;
        let id = self.registry.add_track(fmt)?;
        self.reselect(category);
        Ok(id)
    }

    fn send(&mut self, id: TrackId, mut block: Block) -> Result<()> {
        let (category, group, selected) = {
            let track = self
                .registry
                .track(id)
                .ok_or(EsOutError::UnknownTrack(id.raw()))?;
            (track.category(), track.group, track.decoder.is_some())
        };

        // Unselected tracks and out-of-window audio are dropped, not
        // queued; deliberate flow control, not an error.
        if !selected {
            log::trace!("dropping block for unselected {}", id);
            return Ok(());
        }
        if category == EsCategory::Audio
            && !(AUDIO_RATE_MIN..=AUDIO_RATE_MAX).contains(&self.rate)
        {
            log::trace!("dropping audio block at rate {}", self.rate);
            return Ok(());
        }

        let delay = match category {
            EsCategory::Audio | EsCategory::Subtitle => {
                self.delays.get(&category).copied().unwrap_or(0)
            }
            _ => 0,
        };

        if block.is_preroll {
            // Clock translation before the first calibrated PCR would be
            // meaningless; only the flat delay applies.
            block.pts = block.pts.map(|ts| ts + delay);
            block.dts = block.dts.map(|ts| ts + delay);
        } else {
            let translate = |ts: i64| self.registry.translate(group, ts).map(|out| out + delay);
            let pts = block.pts.and_then(translate);
            let dts = block.dts.and_then(translate);
            if block.pts.is_some() && pts.is_none() {
                log::debug!("dropping block for {}: program clock not calibrated", id);
                return Ok(());
            }
            block.pts = pts;
            block.dts = dts;
        }
        if self.rate != 1.0 {
            block.duration = block
                .duration
                .map(|d| (d as f64 / self.rate) as i64);
        }

        if !self.wait_for_queue_space(id) {
            log::debug!("decoder queue full for {}, dropping block", id);
            return Ok(());
        }

        let result = self
            .registry
            .track_mut(id)
            .and_then(|t| t.decoder.as_mut())
            .map(|d| d.send(block));
        match result {
            Some(Ok(())) => {}
            Some(Err(err)) => return Err(err),
            None => return Ok(()),
        }

        if category == EsCategory::Video {
            self.derive_captions(id);
        }
        Ok(())
    }

    fn del(&mut self, id: TrackId) -> Result<()> {
        // Drop the decoder first so caption children are collected with
        // their parent.
        self.unselect(id);
        let removed = self.registry.remove_track(id)?;
        let category = removed[0].category();
        for track in removed {
            self.policy.forget(track.id);
        }
        self.reselect(category);
        Ok(())
    }

    fn control(&mut self, cmd: Control) -> Result<ControlOutcome> {
        match cmd {
            Control::SetEs(id) => {
                let category = self
                    .registry
                    .track(id)
                    .map(|t| t.category())
                    .ok_or(EsOutError::UnknownTrack(id.raw()))?;
                if !self.policy.is_category_enabled(category) {
                    // User-forced override on a disabled category.
                    log::warn!("{} category disabled, selecting {} anyway", category, id);
                }
                self.policy.note_explicit(category, id);
                let others: Vec<TrackId> = self
                    .registry
                    .tracks_in_order()
                    .filter(|t| t.category() == category && t.decoder.is_some() && t.id != id)
                    .map(|t| t.id)
                    .collect();
                for other in others {
                    self.unselect(other);
                    self.policy.clear_forced(other);
                }
                let ok = self.select(id);
                if ok {
                    self.policy.note_forced(id);
                }
                self.policy
                    .note_current(category, if ok { Some(id) } else { None });
                Ok(if ok {
                    ControlOutcome::Applied
                } else {
                    ControlOutcome::Ignored
                })
            }
            Control::RestartEs(id) => {
                if self.registry.track(id).is_none() {
                    return Err(EsOutError::UnknownTrack(id.raw()));
                }
                if !self.registry.is_selected(id) {
                    return Ok(ControlOutcome::Ignored);
                }
                self.unselect(id);
                let ok = self.select(id);
                Ok(if ok {
                    ControlOutcome::Applied
                } else {
                    ControlOutcome::Ignored
                })
            }
            Control::SetEsDefault(id) => {
                let Some(track) = self.registry.track(id) else {
                    return Err(EsOutError::UnknownTrack(id.raw()));
                };
                if track.category() != EsCategory::Subtitle {
                    return Ok(ControlOutcome::Ignored);
                }
                self.policy.set_default_subtitle(id);
                self.reselect(EsCategory::Subtitle);
                Ok(ControlOutcome::Applied)
            }
            Control::SetEsState(id, on) => {
                let category = self
                    .registry
                    .track(id)
                    .map(|t| t.category())
                    .ok_or(EsOutError::UnknownTrack(id.raw()))?;
                let selected = self.registry.is_selected(id);
                if on == selected {
                    // Idempotent: selecting a selected track (or
                    // unselecting an unselected one) is a no-op.
                    return Ok(ControlOutcome::Ignored);
                }
                if on {
                    if !self.policy.is_category_enabled(category) {
                        log::warn!("{} category disabled, enabling {} anyway", category, id);
                    }
                    let ok = self.select(id);
                    if ok {
                        // The forced flag keeps the track wanted through
                        // later re-evaluations.
                        self.policy.note_forced(id);
                        self.policy.note_current(category, Some(id));
                    }
                    Ok(if ok {
                        ControlOutcome::Applied
                    } else {
                        ControlOutcome::Ignored
                    })
                } else {
                    self.unselect(id);
                    self.policy.clear_forced(id);
                    if self.policy.current(category) == Some(id) {
                        self.policy.note_current(category, None);
                    }
                    Ok(ControlOutcome::Applied)
                }
            }
            Control::SetEsFmt(id, fmt) => {
                let category = fmt.category;
                self.registry.set_format(id, fmt)?;
                self.reselect(category);
                Ok(ControlOutcome::Applied)
            }
            Control::SetPcr(pcr) => self.control(Control::SetGroupPcr(0, pcr)),
            Control::SetGroupPcr(group, pcr) => {
                let now = (self.now)();
                self.registry.set_program_pcr(group, pcr, now)?;
                Ok(ControlOutcome::Applied)
            }
            Control::ResetPcr(group) => {
                self.registry.reset_pcr(group);
                Ok(ControlOutcome::Applied)
            }
            Control::SetGroupMeta(group, meta) => {
                if group < 0 {
                    return Err(EsOutError::InvalidData(format!(
                        "negative group id {}",
                        group
                    )));
                }
                self.registry.set_group_meta(group, meta.name, meta.publisher);
                Ok(ControlOutcome::Applied)
            }
            Control::SetGroupEpg(group, epg) => {
                if group < 0 {
                    return Err(EsOutError::InvalidData(format!(
                        "negative group id {}",
                        group
                    )));
                }
                self.registry.set_group_now_playing(group, epg.title);
                Ok(ControlOutcome::Applied)
            }
            Control::DelGroup(group) => {
                if self.registry.del_group(group)? {
                    Ok(ControlOutcome::Applied)
                } else {
                    Ok(ControlOutcome::Ignored)
                }
            }
            Control::SetMode(mode) => {
                log::debug!("switching selection mode to {:?}", mode);
                self.policy.set_mode(mode);
                self.reselect_all();
                Ok(ControlOutcome::Applied)
            }
            Control::SetDelay(category, delay) => {
                self.delays.insert(category, delay);
                Ok(ControlOutcome::Applied)
            }
            Control::SetRate { source, rate } => {
                if source <= 0.0 || rate <= 0.0 {
                    return Err(EsOutError::InvalidData(format!(
                        "invalid rate {}/{}",
                        source, rate
                    )));
                }
                self.source_rate = source;
                self.rate = rate;
                self.registry.set_rate(rate);
                Ok(ControlOutcome::Applied)
            }
            Control::SetTime(time) => {
                self.absolute_time = Some(time);
                Ok(ControlOutcome::Applied)
            }
            Control::FrameNext => {
                // Single-frame stepping happens inside the decoder; the
                // gateway has nothing to advance.
                Ok(ControlOutcome::Ignored)
            }
            Control::SetPauseState { paused, date: _ } => {
                if self.paused == paused {
                    return Ok(ControlOutcome::Ignored);
                }
                self.paused = paused;
                if !paused {
                    // Stream time resumes from an arbitrary point; force
                    // recalibration.
                    self.registry.reset_pcr(None);
                }
                Ok(ControlOutcome::Applied)
            }
        }
    }

    fn query(&mut self, query: Query) -> Result<bool> {
        Ok(match query {
            Query::Buffering => self.is_buffering(),
            // The direct path holds no queue of its own.
            Query::Empty => true,
            // The producer paces itself against real time in direct mode.
            Query::Pace => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::es::tests::SinkFactory;
    use crate::es::{Decoder, EsOutMode};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    /// Records blocks per format id into shared storage so tests can
    /// inspect them after the gateway has consumed the decoder.
    #[derive(Default)]
    struct Recorder {
        blocks: Mutex<Vec<(Option<i32>, Block)>>,
    }

    struct SharedDecoder {
        fmt_id: Option<i32>,
        recorder: Arc<Recorder>,
        captions: u8,
    }

    impl Decoder for SharedDecoder {
        fn send(&mut self, block: Block) -> crate::Result<()> {
            self.recorder.blocks.lock().push((self.fmt_id, block));
            Ok(())
        }

        fn caption_channels(&self) -> u8 {
            self.captions
        }
    }

    struct SharedFactory {
        recorder: Arc<Recorder>,
        captions: u8,
    }

    impl DecoderFactory for SharedFactory {
        fn create(
            &mut self,
            fmt: &EsFormat,
            _drain: DrainNotify,
            _queue_depth: usize,
        ) -> crate::Result<Box<dyn Decoder>> {
            Ok(Box::new(SharedDecoder {
                fmt_id: fmt.id,
                recorder: self.recorder.clone(),
                captions: if fmt.category == EsCategory::Video {
                    self.captions
                } else {
                    0
                },
            }))
        }
    }

    fn gateway_with(recorder: Arc<Recorder>, captions: u8, config: &Config) -> EsOutGateway {
        let mut gw = EsOutGateway::new(config, Box::new(SharedFactory { recorder, captions }));
        gw.set_time_source(|| 1_000_000);
        gw
    }

    fn audio_fmt(id: i32, language: &str, priority: i32) -> EsFormat {
        EsFormat::audio(FourCc::new(b"mpga"))
            .with_id(id)
            .with_group(0)
            .with_language(language)
            .with_priority(priority)
    }

    #[test]
    fn test_auto_selection_priority_then_language() {
        let recorder = Arc::new(Recorder::default());
        let config = Config::new().with_audio_language(["en"]);
        let mut gw = gateway_with(recorder, 0, &config);

        let _video = gw
            .add(EsFormat::video(FourCc::new(b"h264")).with_id(1).with_group(0))
            .unwrap();
        let fr = gw.add(audio_fmt(2, "fr", 2)).unwrap();
        let en = gw.add(audio_fmt(3, "en", 1)).unwrap();

        // Priority wins over language preference.
        assert!(gw.registry().is_selected(fr));
        assert!(!gw.registry().is_selected(en));

        gw.del(fr).unwrap();
        assert!(gw.registry().is_selected(en));
    }

    #[test]
    fn test_set_es_state_idempotent() {
        let recorder = Arc::new(Recorder::default());
        let config = Config::new();
        let mut gw = gateway_with(recorder, 0, &config);
        let id = gw.add(audio_fmt(1, "en", 0)).unwrap();

        assert!(gw.registry().is_selected(id));
        assert_eq!(
            gw.control(Control::SetEsState(id, true)).unwrap(),
            ControlOutcome::Ignored
        );
        assert_eq!(
            gw.control(Control::SetEsState(id, false)).unwrap(),
            ControlOutcome::Applied
        );
        assert_eq!(
            gw.control(Control::SetEsState(id, false)).unwrap(),
            ControlOutcome::Ignored
        );
    }

    #[test]
    fn test_translation_and_preroll_delay() {
        let recorder = Arc::new(Recorder::default());
        let config = Config::new();
        let mut gw = gateway_with(recorder.clone(), 0, &config);
        let id = gw.add(audio_fmt(7, "en", 0)).unwrap();

        gw.control(Control::SetDelay(EsCategory::Audio, 100)).unwrap();
        gw.control(Control::SetGroupPcr(0, 50_000)).unwrap();

        // Preroll: flat delay only.
        gw.send(id, Block::new(vec![1u8]).with_pts(10).with_preroll(true))
            .unwrap();
        // Calibrated: translated through the program clock, then delayed.
        gw.send(id, Block::new(vec![2u8]).with_pts(60_000)).unwrap();

        let blocks = recorder.blocks.lock();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].1.pts, Some(110));
        // pcr 50_000 anchored at system 1_000_000; +10_000 stream, +100 delay.
        assert_eq!(blocks[1].1.pts, Some(1_010_100));
    }

    #[test]
    fn test_unselected_and_fast_audio_blocks_dropped() {
        let recorder = Arc::new(Recorder::default());
        let mut config = Config::new();
        config.audio_enabled = false;
        let mut gw = gateway_with(recorder.clone(), 0, &config);
        let id = gw.add(audio_fmt(1, "en", 0)).unwrap();

        // Disabled category: no decoder, block dropped silently.
        assert!(!gw.registry().is_selected(id));
        gw.send(id, Block::new(vec![0u8])).unwrap();
        assert!(recorder.blocks.lock().is_empty());

        // Forced selection proceeds despite the disabled category.
        gw.control(Control::SetEsState(id, true)).unwrap();
        assert!(gw.registry().is_selected(id));

        // Outside the supported rate window audio is dropped.
        gw.control(Control::SetRate {
            source: 1.0,
            rate: 8.0,
        })
        .unwrap();
        gw.send(id, Block::new(vec![0u8]).with_preroll(true)).unwrap();
        assert!(recorder.blocks.lock().is_empty());
    }

    #[test]
    fn test_dts_keeps_decode_lead_through_translation() {
        let recorder = Arc::new(Recorder::default());
        let config = Config::new();
        let mut gw = gateway_with(recorder.clone(), 0, &config);
        let id = gw.add(audio_fmt(1, "en", 0)).unwrap();
        gw.control(Control::SetGroupPcr(0, 0)).unwrap();

        // B-frame shape: dts runs ahead of pts in decode order.
        gw.send(id, Block::new(vec![0u8]).with_pts(50_000).with_dts(30_000))
            .unwrap();

        let blocks = recorder.blocks.lock();
        assert_eq!(blocks[0].1.pts, Some(1_050_000));
        assert_eq!(blocks[0].1.dts, Some(1_030_000));
    }

    #[test]
    fn test_forced_selection_survives_reselect_on_disabled_category() {
        let recorder = Arc::new(Recorder::default());
        let mut config = Config::new();
        config.audio_enabled = false;
        let mut gw = gateway_with(recorder, 0, &config);

        let forced = gw.add(audio_fmt(1, "en", 0)).unwrap();
        gw.control(Control::SetEsState(forced, true)).unwrap();
        assert!(gw.registry().is_selected(forced));

        // A later add re-evaluates the category; the forced track must
        // not be torn down and the newcomer must not be picked up.
        let other = gw.add(audio_fmt(2, "fr", 5)).unwrap();
        assert!(gw.registry().is_selected(forced));
        assert!(!gw.registry().is_selected(other));

        // Turning it off clears the override for good.
        gw.control(Control::SetEsState(forced, false)).unwrap();
        gw.add(audio_fmt(3, "de", 0)).unwrap();
        assert!(!gw.registry().is_selected(forced));
    }

    #[test]
    fn test_factory_receives_configured_queue_depth() {
        struct DepthFactory(Arc<Mutex<Vec<usize>>>);

        impl DecoderFactory for DepthFactory {
            fn create(
                &mut self,
                _fmt: &EsFormat,
                _drain: DrainNotify,
                queue_depth: usize,
            ) -> crate::Result<Box<dyn Decoder>> {
                self.0.lock().push(queue_depth);
                Ok(Box::new(crate::es::tests::SinkDecoder::default()))
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut config = Config::new();
        config.decoder_queue_depth = 7;
        let mut gw = EsOutGateway::new(&config, Box::new(DepthFactory(seen.clone())));
        gw.add(audio_fmt(1, "en", 0)).unwrap();
        assert_eq!(seen.lock().as_slice(), &[7]);
    }

    #[test]
    fn test_caption_subtrack_derived_and_torn_down() {
        let recorder = Arc::new(Recorder::default());
        let config = Config::new();
        let mut gw = gateway_with(recorder, 0b0001, &config);
        let video = gw
            .add(EsFormat::video(FourCc::new(b"h264")).with_id(1).with_group(0))
            .unwrap();

        gw.send(video, Block::new(vec![0u8]).with_preroll(true))
            .unwrap();

        let child = gw.registry().track(video).unwrap().captions[0]
            .expect("caption channel 1 should spawn a sub-track");
        let child_track = gw.registry().track(child).unwrap();
        assert_eq!(child_track.category(), EsCategory::Subtitle);
        assert_eq!(child_track.caption_master, Some((video, 0)));
        assert_eq!(gw.registry().program(0).unwrap().track_count(), 2);

        // Children go away with the parent.
        gw.del(video).unwrap();
        assert!(gw.registry().track(child).is_none());
        assert_eq!(gw.registry().program(0).unwrap().track_count(), 0);
    }

    #[test]
    fn test_decoder_failure_leaves_track_unselected() {
        let config = Config::new();
        let mut gw = EsOutGateway::new(
            &config,
            Box::new(SinkFactory {
                created: 0,
                fail: true,
            }),
        );
        let id = gw.add(audio_fmt(1, "en", 0)).unwrap();
        assert!(!gw.registry().is_selected(id));
        // Not retried on send; block dropped without error.
        gw.send(id, Block::new(vec![0u8])).unwrap();
    }

    #[test]
    fn test_mode_none_unselects_everything() {
        let recorder = Arc::new(Recorder::default());
        let config = Config::new();
        let mut gw = gateway_with(recorder, 0, &config);
        let id = gw.add(audio_fmt(1, "en", 0)).unwrap();
        assert!(gw.registry().is_selected(id));

        gw.control(Control::SetMode(EsOutMode::None)).unwrap();
        assert!(!gw.registry().is_selected(id));
    }

    #[test]
    fn test_queries() {
        let recorder = Arc::new(Recorder::default());
        let config = Config::new();
        let mut gw = gateway_with(recorder, 0, &config);
        let _id = gw.add(audio_fmt(1, "en", 0)).unwrap();

        assert!(gw.query(Query::Buffering).unwrap());
        gw.control(Control::SetGroupPcr(0, 0)).unwrap();
        assert!(!gw.query(Query::Buffering).unwrap());
        assert!(gw.query(Query::Empty).unwrap());
        assert!(gw.query(Query::Pace).unwrap());
    }
}
