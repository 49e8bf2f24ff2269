#![doc(html_root_url = "https://docs.rs/esout/0.1.0")]

//! # esout - Elementary-Stream Output Layer
//!
//! `esout` is the output stage of a media playback pipeline: the layer a
//! demuxer hands elementary streams to. It registers tracks, decides
//! which ones get a decoder, translates stream timestamps onto the
//! system clock, and can transparently time-shift the whole stream when
//! playback pauses or changes speed.
//!
//! ## Features
//!
//! ### Track management and selection
//! - Program/track registry with per-program clocks
//! - Automatic selection by priority and language preference, plus
//!   explicit, all, and per-program selection modes
//! - Closed-caption sub-tracks derived from video decoders
//!
//! ### Timing
//! - PCR-driven clock with drift smoothing and monotonic output
//! - Per-category presentation delays and playback-rate scaling
//!
//! ### Timeshift
//! - Transparent proxy that captures commands into a segmented log on
//!   pause or off-source rate, replays them on their shifted deadlines,
//!   and spills payloads to temp files past a memory threshold
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use esout::{Block, Config, EsFormat, EsOut, EsOutGateway, FourCc};
//! use esout::es::tests::SinkFactory;
//!
//! fn main() -> esout::Result<()> {
//!     let config = Config::new().with_audio_language(["en", "fr"]);
//!     let mut out = EsOutGateway::new(&config, Box::new(SinkFactory::default()));
//!
//!     let video = out.add(EsFormat::video(FourCc::new(b"h264")))?;
//!     out.control(esout::Control::SetPcr(0))?;
//!     out.send(video, Block::new(vec![0u8; 188]).with_pts(3_000))?;
//!     Ok(())
//! }
//! ```
//!
//! ### Time-shifted output
//!
//! ```rust,no_run
//! use esout::{Config, Control, EsOut, EsOutGateway, Timeshift};
//! use esout::es::tests::SinkFactory;
//!
//! fn main() -> esout::Result<()> {
//!     let config = Config::new();
//!     let gateway = EsOutGateway::new(&config, Box::new(SinkFactory::default()));
//!     let mut out = Timeshift::new(Box::new(gateway), config.timeshift)?;
//!
//!     // The first pause starts capturing; resume replays with the
//!     // accumulated delay.
//!     out.control(Control::SetPauseState { paused: true, date: 0 })?;
//!     out.control(Control::SetPauseState { paused: false, date: 5_000_000 })?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod es;
pub mod gateway;
pub mod lang;
pub mod policy;
pub mod registry;
pub mod timeshift;

pub use config::{Config, TimeshiftConfig};
pub use error::{EsOutError, Result};
pub use es::{
    Block, Control, ControlOutcome, Decoder, DecoderFactory, DrainNotify, EpgNow, EsCategory,
    EsFormat, EsOut, EsOutMode, FourCc, GroupMeta, Query, TrackId,
};
pub use gateway::EsOutGateway;
pub use timeshift::{Timeshift, TimeshiftListener};
