//! Track-selection policy.
//!
//! Decides, per category, which tracks should be active given the
//! operating mode, per-track priority, language preferences and explicit
//! user overrides. The decision functions are pure over a registry
//! snapshot; applying decisions (creating/destroying decoders) is the
//! output gateway's job.

use std::collections::{HashMap, HashSet};

use crate::es::{EsCategory, EsOutMode, TrackId, PRIORITY_SELECTABLE_MIN};
use crate::lang;
use crate::registry::{EsRegistry, Track};

/// Rank of a track against a preference list; lower is better.
/// An empty preference list or an undetermined track language is a valid
/// match at the best rank.
fn language_rank(track: &Track, prefs: &[String]) -> usize {
    if prefs.is_empty() || track.language.is_undetermined() {
        return 0;
    }
    prefs
        .iter()
        .position(|p| lang::matches(&track.language, p))
        .unwrap_or(usize::MAX)
}

/// Selection state for all categories.
pub struct SelectionPolicy {
    mode: EsOutMode,
    /// Global per-category toggles; a disabled category suppresses
    /// automatic selection unconditionally.
    enabled: HashMap<EsCategory, bool>,
    /// Ordered language preferences for audio and subtitle.
    audio_prefs: Vec<String>,
    subtitle_prefs: Vec<String>,
    /// Explicit user choices; always win while the track exists.
    explicit: HashMap<EsCategory, TrackId>,
    /// Tracks the user forced on individually; they stay active through
    /// re-evaluation even when their category is disabled.
    forced: HashSet<TrackId>,
    /// Default/forced subtitle candidate.
    default_subtitle: Option<TrackId>,
    /// Currently active track per category in single-selection modes.
    current: HashMap<EsCategory, TrackId>,
}

impl SelectionPolicy {
    pub fn new(mode: EsOutMode, audio_prefs: Vec<String>, subtitle_prefs: Vec<String>) -> Self {
        let mut enabled = HashMap::new();
        for category in [
            EsCategory::Video,
            EsCategory::Audio,
            EsCategory::Subtitle,
            EsCategory::Data,
        ] {
            enabled.insert(category, true);
        }
        Self {
            mode,
            enabled,
            audio_prefs,
            subtitle_prefs,
            explicit: HashMap::new(),
            forced: HashSet::new(),
            default_subtitle: None,
            current: HashMap::new(),
        }
    }

    pub fn mode(&self) -> &EsOutMode {
        &self.mode
    }

    pub fn set_mode(&mut self, mode: EsOutMode) {
        self.mode = mode;
    }

    pub fn set_category_enabled(&mut self, category: EsCategory, on: bool) {
        self.enabled.insert(category, on);
    }

    pub fn is_category_enabled(&self, category: EsCategory) -> bool {
        self.enabled.get(&category).copied().unwrap_or(true)
    }

    /// Record an explicit user selection for the track's category.
    pub fn note_explicit(&mut self, category: EsCategory, id: TrackId) {
        self.explicit.insert(category, id);
    }

    /// Mark a track as user-forced; it is exempt from automatic
    /// unselection until cleared or removed.
    pub fn note_forced(&mut self, id: TrackId) {
        self.forced.insert(id);
    }

    pub fn clear_forced(&mut self, id: TrackId) {
        self.forced.remove(&id);
    }

    pub fn set_default_subtitle(&mut self, id: TrackId) {
        self.default_subtitle = Some(id);
    }

    pub fn current(&self, category: EsCategory) -> Option<TrackId> {
        self.current.get(&category).copied()
    }

    /// Record the track the gateway actually activated for a category.
    pub fn note_current(&mut self, category: EsCategory, id: Option<TrackId>) {
        match id {
            Some(id) => {
                self.current.insert(category, id);
            }
            None => {
                self.current.remove(&category);
            }
        }
    }

    /// Forget a removed track everywhere it might be referenced.
    pub fn forget(&mut self, id: TrackId) {
        self.explicit.retain(|_, t| *t != id);
        self.forced.remove(&id);
        self.current.retain(|_, t| *t != id);
        if self.default_subtitle == Some(id) {
            self.default_subtitle = None;
        }
    }

    /// Compute the set of tracks that should be active for `category`.
    pub fn wanted(&self, registry: &EsRegistry, category: EsCategory) -> Vec<TrackId> {
        let mut wanted = if !self.is_category_enabled(category) {
            Vec::new()
        } else {
            match &self.mode {
                EsOutMode::None => Vec::new(),
                EsOutMode::All => registry
                    .tracks_in_order()
                    .filter(|t| {
                        t.category() == category && t.fmt.priority >= PRIORITY_SELECTABLE_MIN
                    })
                    .map(|t| t.id)
                    .collect(),
                EsOutMode::Partial(groups) => registry
                    .tracks_in_order()
                    .filter(|t| {
                        t.category() == category
                            && groups.contains(&t.group)
                            && t.fmt.priority >= PRIORITY_SELECTABLE_MIN
                    })
                    .map(|t| t.id)
                    .collect(),
                EsOutMode::Auto => self.auto_select(registry, category).into_iter().collect(),
            }
        };
        // User-forced tracks stay wanted whatever the mode or category
        // toggle says, until turned off or removed.
        for track in registry.tracks_in_order() {
            if track.category() == category
                && self.forced.contains(&track.id)
                && !wanted.contains(&track.id)
            {
                wanted.push(track.id);
            }
        }
        wanted
    }

    fn auto_select(&self, registry: &EsRegistry, category: EsCategory) -> Option<TrackId> {
        let master = registry.master_group()?;

        // An explicit override always wins while its track is live and
        // not marked unselectable.
        if let Some(&explicit) = self.explicit.get(&category) {
            if let Some(track) = registry.track(explicit) {
                if track.category() == category
                    && track.fmt.priority > crate::es::PRIORITY_NOT_SELECTABLE
                {
                    return Some(explicit);
                }
            }
        }

        let prefs: &[String] = match category {
            EsCategory::Audio => &self.audio_prefs,
            EsCategory::Subtitle => &self.subtitle_prefs,
            _ => &[],
        };

        let candidates: Vec<&Track> = registry
            .tracks_in_order()
            .filter(|t| {
                t.category() == category
                    && t.group == master
                    && t.fmt.priority >= PRIORITY_SELECTABLE_MIN
            })
            .collect();

        let current = self.current.get(&category).copied();
        let mut best: Option<&Track> = None;
        for &candidate in &candidates {
            match best {
                None => best = Some(candidate),
                Some(incumbent) => {
                    if self.beats(candidate, incumbent, prefs, current) {
                        best = Some(candidate);
                    }
                }
            }
        }
        let best = best?;

        if category == EsCategory::Subtitle {
            // Subtitles are only engaged automatically when a language
            // preference matches or a default/forced track is declared.
            let matched =
                !self.subtitle_prefs.is_empty() && language_rank(best, prefs) != usize::MAX;
            if !matched {
                let default = self.default_subtitle?;
                return candidates
                    .iter()
                    .find(|t| t.id == default)
                    .map(|t| t.id);
            }
        }
        Some(best.id)
    }

    /// Ordering between two candidates: priority dominates, then
    /// language-preference rank, then the incumbent current track, then
    /// registration order.
    fn beats(
        &self,
        candidate: &Track,
        incumbent: &Track,
        prefs: &[String],
        current: Option<TrackId>,
    ) -> bool {
        if candidate.fmt.priority != incumbent.fmt.priority {
            return candidate.fmt.priority > incumbent.fmt.priority;
        }
        let candidate_rank = language_rank(candidate, prefs);
        let incumbent_rank = language_rank(incumbent, prefs);
        if candidate_rank != incumbent_rank {
            return candidate_rank < incumbent_rank;
        }
        if current == Some(incumbent.id) {
            return false;
        }
        if current == Some(candidate.id) {
            return true;
        }
        false
    }
}
