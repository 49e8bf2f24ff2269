use super::format::{EsCategory, EsFormat};
use super::TrackId;

/// Operating mode of the track-selection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EsOutMode {
    /// Selection disabled; no track is ever selected.
    None,
    /// Every selectable track is selected, regardless of program.
    All,
    /// Only tracks belonging to the listed program groups are selectable.
    Partial(Vec<i32>),
    /// One track per category, chosen by priority and language preference.
    Auto,
}

/// Program-level display metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupMeta {
    pub name: Option<String>,
    pub publisher: Option<String>,
}

/// "Now playing" information attached to a program from EPG data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpgNow {
    pub title: String,
}

/// Control requests accepted by every [`super::EsOut`] implementation.
///
/// Each opcode carries its full argument shape, so dispatch is a single
/// `match` and missing-case handling is a compile-time property.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    /// Select exactly this track, recording it as the explicit override
    /// for its category.
    SetEs(TrackId),
    /// Tear down and re-create the track's decoder.
    RestartEs(TrackId),
    /// Mark a subtitle track as the default/forced candidate.
    SetEsDefault(TrackId),
    /// Select (`true`) or unselect (`false`) one track.
    SetEsState(TrackId, bool),
    /// Replace a track's format in place.
    SetEsFmt(TrackId, EsFormat),
    /// PCR update for program group 0.
    SetPcr(i64),
    /// PCR update for one program group.
    SetGroupPcr(i32, i64),
    /// Force clock recalibration on the next PCR, for one group or all.
    ResetPcr(Option<i32>),
    SetGroupMeta(i32, GroupMeta),
    SetGroupEpg(i32, EpgNow),
    /// Remove an empty program group.
    DelGroup(i32),
    SetMode(EsOutMode),
    /// Extra presentation delay for one category, microseconds.
    SetDelay(EsCategory, i64),
    /// Playback rate change; `source` is the pace the producer delivers
    /// at, `rate` the pace requested downstream (1.0 = normal).
    SetRate { source: f64, rate: f64 },
    /// Absolute source time, microseconds. Informational in direct mode;
    /// rejected by the timeshift layer (a live log cannot seek).
    SetTime(i64),
    /// Advance exactly one video frame while paused.
    FrameNext,
    /// Pause or resume, stamped with the caller's monotonic date.
    SetPauseState { paused: bool, date: i64 },
}

impl Control {
    /// The track this control addresses, if any.
    pub fn track(&self) -> Option<TrackId> {
        match self {
            Control::SetEs(id)
            | Control::RestartEs(id)
            | Control::SetEsDefault(id)
            | Control::SetEsState(id, _)
            | Control::SetEsFmt(id, _) => Some(*id),
            _ => None,
        }
    }

    /// Rewrite the addressed track id through `map`. Used by the
    /// timeshift layer to translate its indirection handles into the
    /// downstream registry's ids at replay time.
    pub(crate) fn map_track(self, map: impl FnOnce(TrackId) -> TrackId) -> Self {
        match self {
            Control::SetEs(id) => Control::SetEs(map(id)),
            Control::RestartEs(id) => Control::RestartEs(map(id)),
            Control::SetEsDefault(id) => Control::SetEsDefault(map(id)),
            Control::SetEsState(id, on) => Control::SetEsState(map(id), on),
            Control::SetEsFmt(id, fmt) => Control::SetEsFmt(map(id), fmt),
            other => other,
        }
    }
}

/// Outcome of a successfully handled control.
///
/// Policy outcomes that apply to nothing (already selected, disabled
/// category, empty group) are reported as [`ControlOutcome::Ignored`]
/// rather than as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Applied,
    Ignored,
}

/// State queries answered synchronously by every [`super::EsOut`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// Is the output still waiting for its first calibrated PCR?
    Buffering,
    /// Has every queued command/block been consumed?
    Empty,
    /// Must the caller pace itself (true), or does the output pace its
    /// own consumption (false, e.g. while time-shifting)?
    Pace,
}
