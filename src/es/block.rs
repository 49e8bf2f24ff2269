use bytes::Bytes;

/// A timed elementary-stream payload block.
///
/// Timestamps are in microseconds on the source reference timeline; the
/// output gateway translates them to presentation time through the owning
/// program's clock before handing the block to a decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    /// Display duration in microseconds, if known.
    pub duration: Option<i64>,
    pub is_key: bool,
    /// Preroll blocks are delivered before the owning program's clock has
    /// been calibrated and are exempt from clock translation.
    pub is_preroll: bool,
}

impl Block {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: None,
            dts: None,
            duration: None,
            is_key: false,
            is_preroll: false,
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: i64) -> Self {
        self.dts = Some(dts);
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_key_flag(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn with_preroll(mut self, is_preroll: bool) -> Self {
        self.is_preroll = is_preroll;
        self
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
