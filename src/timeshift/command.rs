//! Captured command representation.

use bytes::Bytes;

use crate::es::{Block, Control, EsFormat};

/// Index into the timeshift layer's track indirection table. Commands
/// captured before their track exists downstream address it through the
/// slot; the slot is bound to a real registry id when the `Add` replays.
pub type Slot = usize;

/// Block metadata kept in memory when the payload has been written
/// through to the segment's backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMeta {
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: Option<i64>,
    pub is_key: bool,
    pub is_preroll: bool,
}

impl BlockMeta {
    pub fn of(block: &Block) -> Self {
        Self {
            pts: block.pts,
            dts: block.dts,
            duration: block.duration,
            is_key: block.is_key,
            is_preroll: block.is_preroll,
        }
    }

    pub fn into_block(self, data: Bytes) -> Block {
        Block {
            data,
            pts: self.pts,
            dts: self.dts,
            duration: self.duration,
            is_key: self.is_key,
            is_preroll: self.is_preroll,
        }
    }
}

/// A Send payload, resident or spilled.
#[derive(Debug)]
pub enum TsBlock {
    Memory(Block),
    /// Payload lives in the segment's backing file at `offset`.
    Spilled {
        meta: BlockMeta,
        offset: u64,
        len: u32,
    },
}

impl TsBlock {
    /// Bytes this entry currently holds in memory.
    pub fn mem_len(&self) -> usize {
        match self {
            TsBlock::Memory(block) => block.len(),
            TsBlock::Spilled { .. } => 0,
        }
    }
}

/// One captured call, stamped with its capture time (microseconds on the
/// producer's monotonic timeline).
#[derive(Debug)]
pub enum TsCmd {
    Add {
        slot: Slot,
        fmt: EsFormat,
        date: i64,
    },
    Send {
        slot: Slot,
        block: TsBlock,
        date: i64,
    },
    Del {
        slot: Slot,
        date: i64,
    },
    Control {
        cmd: Control,
        date: i64,
    },
}

impl TsCmd {
    pub fn date(&self) -> i64 {
        match self {
            TsCmd::Add { date, .. }
            | TsCmd::Send { date, .. }
            | TsCmd::Del { date, .. }
            | TsCmd::Control { date, .. } => *date,
        }
    }

    /// Bytes this command currently holds in memory for its payload.
    pub fn mem_len(&self) -> usize {
        match self {
            TsCmd::Send { block, .. } => block.mem_len(),
            _ => 0,
        }
    }
}
