//! Program and track registry.
//!
//! Owns the set of programs and tracks, their formats and derived
//! language metadata, the per-program presentation clock, and the
//! parent/child links for closed-caption sub-tracks. Entities are held in
//! maps keyed by integer handles; relationships are handle fields, never
//! pointers, so program membership and caption back-references stay
//! unambiguous.

use std::collections::HashMap;

use crate::clock::ProgramClock;
use crate::error::{EsOutError, Result};
use crate::es::{Decoder, EsCategory, EsFormat, TrackId, CAPTION_CHANNELS};
use crate::lang::{self, Language};

/// A logical grouping of tracks sharing one presentation clock.
pub struct Program {
    pub group: i32,
    pub name: Option<String>,
    pub now_playing: Option<String>,
    pub publisher: Option<String>,
    pub clock: ProgramClock,
    /// Number of live tracks referencing this program.
    track_count: usize,
    /// Exactly one program is the master at any time.
    pub is_master: bool,
}

impl Program {
    fn new(group: i32) -> Self {
        Self {
            group,
            name: None,
            now_playing: None,
            publisher: None,
            clock: ProgramClock::new(),
            track_count: 0,
            is_master: false,
        }
    }

    pub fn track_count(&self) -> usize {
        self.track_count
    }
}

/// One elementary stream within a program.
pub struct Track {
    pub id: TrackId,
    /// Owning program group. The program is guaranteed to exist while the
    /// track does; the track does not own the program's lifetime.
    pub group: i32,
    pub fmt: EsFormat,
    pub language: Language,
    /// Present iff the track is currently selected.
    pub decoder: Option<Box<dyn Decoder>>,
    /// Caption sub-tracks spawned from this (video) track, by channel.
    pub captions: [Option<TrackId>; CAPTION_CHANNELS],
    /// For a synthesized caption track: the parent video track and the
    /// caption channel it was observed on.
    pub caption_master: Option<(TrackId, u8)>,
}

impl Track {
    pub fn category(&self) -> EsCategory {
        self.fmt.category
    }

    pub fn is_caption_child(&self) -> bool {
        self.caption_master.is_some()
    }
}

/// Registry of all programs and tracks known to the output layer.
#[derive(Default)]
pub struct EsRegistry {
    programs: HashMap<i32, Program>,
    tracks: HashMap<u32, Track>,
    /// Track ids in insertion order, for deterministic policy iteration.
    order: Vec<TrackId>,
    next_track: u32,
}

impl EsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a track from its format, resolving or lazily creating the
    /// owning program. Never blocks.
    pub fn add_track(&mut self, fmt: EsFormat) -> Result<TrackId> {
        if fmt.group < 0 {
            return Err(EsOutError::InvalidData(format!(
                "negative group id {}",
                fmt.group
            )));
        }
        let id = TrackId(self.next_track);
        self.next_track += 1;

        self.ensure_program(fmt.group);
        let program = self.programs.get_mut(&fmt.group).unwrap();
        program.track_count += 1;

        let language = lang::resolve(fmt.language.as_deref());
        log::debug!(
            "adding {} track {} codec {} group {} lang {}",
            fmt.category,
            id,
            fmt.codec,
            fmt.group,
            language.code
        );
        self.tracks.insert(
            id.0,
            Track {
                id,
                group: fmt.group,
                fmt,
                language,
                decoder: None,
                captions: [None; CAPTION_CHANNELS],
                caption_master: None,
            },
        );
        self.order.push(id);
        Ok(id)
    }

    /// Remove a track, returning it together with any caption sub-tracks
    /// it spawned (children never outlive their parent). Decoders are
    /// dropped with the returned tracks.
    pub fn remove_track(&mut self, id: TrackId) -> Result<Vec<Track>> {
        let track = self
            .tracks
            .remove(&id.0)
            .ok_or(EsOutError::UnknownTrack(id.0))?;
        self.order.retain(|t| *t != id);
        if let Some(program) = self.programs.get_mut(&track.group) {
            program.track_count -= 1;
        }

        // Detach from a caption parent, if this was a child.
        if let Some((parent, channel)) = track.caption_master {
            if let Some(parent) = self.tracks.get_mut(&parent.0) {
                parent.captions[channel as usize] = None;
            }
        }

        let mut removed = vec![track];
        let children: Vec<TrackId> = removed[0].captions.iter().flatten().copied().collect();
        for child in children {
            // Children carry no captions of their own; one level deep.
            if let Some(mut child_track) = self.tracks.remove(&child.0) {
                self.order.retain(|t| *t != child);
                if let Some(program) = self.programs.get_mut(&child_track.group) {
                    program.track_count -= 1;
                }
                child_track.caption_master = None;
                removed.push(child_track);
            }
        }
        Ok(removed)
    }

    /// Replace a track's format, rederiving language metadata and moving
    /// program membership if the group changed.
    pub fn set_format(&mut self, id: TrackId, fmt: EsFormat) -> Result<()> {
        if fmt.group < 0 {
            return Err(EsOutError::InvalidData(format!(
                "negative group id {}",
                fmt.group
            )));
        }
        let old_group = self
            .tracks
            .get(&id.0)
            .ok_or(EsOutError::UnknownTrack(id.0))?
            .group;
        if fmt.group != old_group {
            self.ensure_program(fmt.group);
            self.programs.get_mut(&old_group).unwrap().track_count -= 1;
            self.programs.get_mut(&fmt.group).unwrap().track_count += 1;
        }
        let track = self.tracks.get_mut(&id.0).unwrap();
        track.group = fmt.group;
        track.language = lang::resolve(fmt.language.as_deref());
        track.fmt = fmt;
        Ok(())
    }

    /// Feed a PCR sample to one program's clock, creating the program on
    /// first reference.
    pub fn set_program_pcr(&mut self, group: i32, pcr: i64, system_now: i64) -> Result<()> {
        if group < 0 {
            return Err(EsOutError::InvalidData(format!(
                "negative group id {}",
                group
            )));
        }
        self.ensure_program(group);
        self.programs
            .get_mut(&group)
            .unwrap()
            .clock
            .update(pcr, system_now);
        Ok(())
    }

    /// Force recalibration of one program's clock, or of all of them.
    pub fn reset_pcr(&mut self, group: Option<i32>) {
        match group {
            Some(group) => {
                if let Some(program) = self.programs.get_mut(&group) {
                    program.clock.reset();
                }
            }
            None => {
                for program in self.programs.values_mut() {
                    program.clock.reset();
                }
            }
        }
    }

    /// Translate a stream timestamp through one program's clock.
    pub fn translate(&self, group: i32, ts: i64) -> Option<i64> {
        self.programs.get(&group)?.clock.translate(ts)
    }

    /// Apply a playback-rate change to every program clock.
    pub fn set_rate(&mut self, rate: f64) {
        for program in self.programs.values_mut() {
            program.clock.set_rate(rate);
        }
    }

    pub fn set_group_meta(&mut self, group: i32, name: Option<String>, publisher: Option<String>) {
        self.ensure_program(group);
        let program = self.programs.get_mut(&group).unwrap();
        if name.is_some() {
            program.name = name;
        }
        if publisher.is_some() {
            program.publisher = publisher;
        }
    }

    pub fn set_group_now_playing(&mut self, group: i32, title: String) {
        self.ensure_program(group);
        self.programs.get_mut(&group).unwrap().now_playing = Some(title);
    }

    /// Remove an empty program. Returns `false` when the group does not
    /// exist; errors when it still owns tracks.
    pub fn del_group(&mut self, group: i32) -> Result<bool> {
        let Some(program) = self.programs.get(&group) else {
            return Ok(false);
        };
        if program.track_count > 0 {
            return Err(EsOutError::InvalidData(format!(
                "group {} still owns {} tracks",
                group,
                program.track_count
            )));
        }
        let was_master = program.is_master;
        self.programs.remove(&group);
        if was_master {
            // Promote the lowest remaining group so exactly one master
            // survives, if any program remains.
            if let Some(&next) = self.programs.keys().min() {
                self.programs.get_mut(&next).unwrap().is_master = true;
            }
        }
        Ok(true)
    }

    pub fn program(&self, group: i32) -> Option<&Program> {
        self.programs.get(&group)
    }

    pub fn master_group(&self) -> Option<i32> {
        self.programs
            .values()
            .find(|p| p.is_master)
            .map(|p| p.group)
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id.0)
    }

    pub fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id.0)
    }

    /// Tracks in registration order.
    pub fn tracks_in_order(&self) -> impl Iterator<Item = &Track> {
        self.order.iter().filter_map(|id| self.tracks.get(&id.0))
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        self.order.clone()
    }

    /// Whether a track is currently selected: it owns a live decoder, or
    /// it is a caption child whose parent decoder reports its channel
    /// active.
    pub fn is_selected(&self, id: TrackId) -> bool {
        let Some(track) = self.tracks.get(&id.0) else {
            return false;
        };
        if track.decoder.is_some() {
            return true;
        }
        if let Some((parent, channel)) = track.caption_master {
            if let Some(parent) = self.tracks.get(&parent.0) {
                if let Some(decoder) = &parent.decoder {
                    return decoder.caption_active(channel);
                }
            }
        }
        false
    }

    fn ensure_program(&mut self, group: i32) {
        if !self.programs.contains_key(&group) {
            let mut program = Program::new(group);
            // The first program observed becomes the master.
            program.is_master = self.programs.is_empty();
            log::debug!(
                "creating program group {}{}",
                group,
                if program.is_master { " (master)" } else { "" }
            );
            self.programs.insert(group, program);
        }
    }
}
