use std::fmt;

/// Elementary-stream category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EsCategory {
    Video,
    Audio,
    Subtitle,
    /// Teletext, private sections and other side data.
    Data,
}

impl fmt::Display for EsCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EsCategory::Video => "video",
            EsCategory::Audio => "audio",
            EsCategory::Subtitle => "subtitle",
            EsCategory::Data => "data",
        };
        f.write_str(name)
    }
}

/// Four-byte codec tag, e.g. `h264`, `mpga`, `cc1 `.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const fn new(tag: &[u8; 4]) -> Self {
        Self(*tag)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

/// Tracks carrying this priority can never be selected automatically.
pub const PRIORITY_NOT_SELECTABLE: i32 = -2;
/// Selectable but never picked as a default.
pub const PRIORITY_NOT_DEFAULTABLE: i32 = -1;
/// Lowest priority eligible for automatic selection.
pub const PRIORITY_SELECTABLE_MIN: i32 = 0;

/// Video-specific format parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    /// Frame rate as a rational (numerator, denominator); (0, 0) if unknown.
    pub frame_rate: (u32, u32),
}

/// Audio-specific format parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Format descriptor for one elementary stream.
///
/// A format is copied into the registry on `add`; the caller keeps
/// ownership of its own copy.
#[derive(Debug, Clone, PartialEq)]
pub struct EsFormat {
    /// Externally assigned stream id (e.g. a transport PID). The registry
    /// assigns its own monotonic track id regardless.
    pub id: Option<i32>,
    /// Owning program group id. Negative group ids are invalid.
    pub group: i32,
    pub category: EsCategory,
    pub codec: FourCc,
    /// Language as declared by the container (ISO-639-1 or -2 code).
    pub language: Option<String>,
    /// Selection priority; higher wins. See [`PRIORITY_SELECTABLE_MIN`].
    pub priority: i32,
    pub video: Option<VideoParams>,
    pub audio: Option<AudioParams>,
    pub extra_data: Option<Vec<u8>>,
}

impl EsFormat {
    pub fn new(category: EsCategory, codec: FourCc) -> Self {
        Self {
            id: None,
            group: 0,
            category,
            codec,
            language: None,
            priority: PRIORITY_SELECTABLE_MIN,
            video: None,
            audio: None,
            extra_data: None,
        }
    }

    pub fn video(codec: FourCc) -> Self {
        Self::new(EsCategory::Video, codec).with_video(VideoParams::default())
    }

    pub fn audio(codec: FourCc) -> Self {
        Self::new(EsCategory::Audio, codec).with_audio(AudioParams::default())
    }

    pub fn subtitle(codec: FourCc) -> Self {
        Self::new(EsCategory::Subtitle, codec)
    }

    pub fn with_id(mut self, id: i32) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_group(mut self, group: i32) -> Self {
        self.group = group;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_video(mut self, params: VideoParams) -> Self {
        self.video = Some(params);
        self
    }

    pub fn with_audio(mut self, params: AudioParams) -> Self {
        self.audio = Some(params);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_display() {
        assert_eq!(FourCc::new(b"h264").to_string(), "h264");
        assert_eq!(FourCc::new(b"cc1 ").to_string(), "cc1 ");
        assert_eq!(FourCc(*b"\x00a b").to_string(), ".a b");
    }

    #[test]
    fn test_format_builder() {
        let fmt = EsFormat::audio(FourCc::new(b"mpga"))
            .with_group(2)
            .with_language("fr")
            .with_priority(3);
        assert_eq!(fmt.category, EsCategory::Audio);
        assert_eq!(fmt.group, 2);
        assert_eq!(fmt.language.as_deref(), Some("fr"));
        assert_eq!(fmt.priority, 3);
    }
}
