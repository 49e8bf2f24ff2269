//! Construction-time configuration.
//!
//! All knobs are supplied by the embedding engine when the output layer
//! is built; runtime changes go through the generic control channel.

use std::path::PathBuf;

use crate::es::EsOutMode;

/// Configuration for the output gateway and selection policy.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: EsOutMode,
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub subtitle_enabled: bool,
    /// Ordered audio language preferences (ISO-639 codes, either form).
    pub audio_language: Vec<String>,
    /// Ordered subtitle language preferences.
    pub subtitle_language: Vec<String>,
    /// Bound on a decoder's pending-block depth before the producer is
    /// made to wait; handed to the decoder factory at creation.
    pub decoder_queue_depth: usize,
    pub timeshift: TimeshiftConfig,
}

/// Configuration for the timeshift command log.
#[derive(Debug, Clone)]
pub struct TimeshiftConfig {
    /// Directory for temporary segment files.
    pub tmp_dir: PathBuf,
    /// In-memory payload bytes across the whole log before Send payloads
    /// spill to disk.
    pub memory_threshold: usize,
    /// Commands per segment before it is sealed.
    pub segment_max_commands: usize,
    /// Serialized Send payload bytes per segment before it is sealed.
    pub segment_max_bytes: u64,
    /// Leave Delayed mode automatically when the log drains at source
    /// rate.
    pub auto_stop: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: EsOutMode::Auto,
            video_enabled: true,
            audio_enabled: true,
            subtitle_enabled: true,
            audio_language: Vec::new(),
            subtitle_language: Vec::new(),
            decoder_queue_depth: 32,
            timeshift: TimeshiftConfig::default(),
        }
    }
}

impl Default for TimeshiftConfig {
    fn default() -> Self {
        Self {
            tmp_dir: std::env::temp_dir(),
            memory_threshold: 32 * 1024 * 1024,
            segment_max_commands: 16_384,
            segment_max_bytes: 8 * 1024 * 1024,
            auto_stop: true,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: EsOutMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_audio_language<I, S>(mut self, langs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audio_language = langs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_subtitle_language<I, S>(mut self, langs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subtitle_language = langs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeshift(mut self, timeshift: TimeshiftConfig) -> Self {
        self.timeshift = timeshift;
        self
    }
}
