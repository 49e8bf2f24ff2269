//! Bounded, ordered chunks of the command log.
//!
//! Each segment holds captured commands in order. Once payload spilling
//! is engaged, Send payloads are written through to the segment's
//! backing temp file as back-to-back (header, length-prefixed payload)
//! records and released from memory; they are re-read at replay. A full
//! segment is sealed and a new one opened behind it; a sealed segment's
//! file is only ever opened read-only, so no file is read and written
//! concurrently. Files are unlinked when the segment is released.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::error::{EsOutError, Result};
use crate::timeshift::command::{BlockMeta, TsBlock, TsCmd};

/// On-disk record header: pts, dts, duration (i64 LE, [`TS_ABSENT`] for
/// none), flags byte, payload length (u32 LE).
pub(crate) const RECORD_HEADER_LEN: usize = 29;

const TS_ABSENT: i64 = i64::MIN;
const FLAG_KEY: u8 = 0x01;
const FLAG_PREROLL: u8 = 0x02;

fn segment_file_path(dir: &Path) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    dir.join(format!(
        "esout-ts-{}-{}.tmp",
        process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    ))
}

fn encode_record(meta: &BlockMeta, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
    for ts in [meta.pts, meta.dts, meta.duration] {
        buf.extend_from_slice(&ts.unwrap_or(TS_ABSENT).to_le_bytes());
    }
    let mut flags = 0u8;
    if meta.is_key {
        flags |= FLAG_KEY;
    }
    if meta.is_preroll {
        flags |= FLAG_PREROLL;
    }
    buf.push(flags);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn decode_header(buf: &[u8; RECORD_HEADER_LEN]) -> (BlockMeta, u32) {
    let ts = |offset: usize| {
        let v = i64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
        (v != TS_ABSENT).then_some(v)
    };
    let flags = buf[24];
    let len = u32::from_le_bytes(buf[25..29].try_into().unwrap());
    (
        BlockMeta {
            pts: ts(0),
            dts: ts(8),
            duration: ts(16),
            is_key: flags & FLAG_KEY != 0,
            is_preroll: flags & FLAG_PREROLL != 0,
        },
        len,
    )
}

/// Backing file for one segment. The write handle exists until the
/// segment is sealed; the read handle is opened lazily for replay.
struct Storage {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    reader: Option<File>,
    write_pos: u64,
}

impl Storage {
    fn create(dir: &Path) -> Result<Self> {
        let path = segment_file_path(dir);
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            reader: None,
            write_pos: 0,
        })
    }

    fn append(&mut self, record: &[u8]) -> Result<u64> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| EsOutError::Storage("segment already sealed".into()))?;
        let offset = self.write_pos;
        writer.write_all(record)?;
        self.write_pos += record.len() as u64;
        Ok(offset)
    }

    fn seal(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    fn read_record(&mut self, offset: u64, expected_len: u32) -> Result<(BlockMeta, Bytes)> {
        if self.reader.is_none() {
            self.reader = Some(File::open(&self.path)?);
        }
        let reader = self.reader.as_mut().unwrap();
        reader.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; RECORD_HEADER_LEN];
        reader.read_exact(&mut header)?;
        let (meta, len) = decode_header(&header);
        if len != expected_len {
            return Err(EsOutError::Storage(format!(
                "record length mismatch at {}: {} != {}",
                offset, len, expected_len
            )));
        }
        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload)?;
        Ok((meta, Bytes::from(payload)))
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        self.writer = None;
        self.reader = None;
        let _ = fs::remove_file(&self.path);
    }
}

/// One bounded chunk of the command log.
pub(crate) struct Segment {
    cmds: VecDeque<TsCmd>,
    /// Commands pushed over the segment's lifetime (capacity accounting
    /// survives pops).
    pushed: usize,
    /// Serialized Send payload bytes, resident or spilled.
    payload_bytes: u64,
    sealed: bool,
    storage: Option<Storage>,
    max_cmds: usize,
    max_bytes: u64,
}

impl Segment {
    pub fn new(max_cmds: usize, max_bytes: u64) -> Self {
        Self {
            cmds: VecDeque::new(),
            pushed: 0,
            payload_bytes: 0,
            sealed: false,
            storage: None,
            max_cmds: max_cmds.max(1),
            max_bytes: max_bytes.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Whether the segment has reached either capacity ceiling.
    pub fn is_full(&self) -> bool {
        self.pushed >= self.max_cmds || self.payload_bytes >= self.max_bytes
    }

    /// Seal the segment: no further pushes, write handle released.
    pub fn seal(&mut self) {
        if self.sealed {
            return;
        }
        self.sealed = true;
        if let Some(storage) = &mut self.storage {
            if let Err(err) = storage.seal() {
                log::warn!("failed to flush segment file: {}", err);
            }
        }
    }

    /// Append one command. With `spill` set, a Send payload is written
    /// through to the backing file (created on demand under `dir`) and
    /// released from memory. Returns the bytes the command now holds in
    /// memory.
    pub fn push(&mut self, mut cmd: TsCmd, spill: bool, dir: &Path) -> Result<usize> {
        debug_assert!(!self.sealed && !self.is_full());
        if let TsCmd::Send { block, .. } = &mut cmd {
            if let TsBlock::Memory(resident) = block {
                self.payload_bytes += resident.len() as u64;
                if spill {
                    if self.storage.is_none() {
                        self.storage = Some(Storage::create(dir)?);
                    }
                    let meta = BlockMeta::of(resident);
                    let record = encode_record(&meta, &resident.data);
                    let offset = self.storage.as_mut().unwrap().append(&record)?;
                    *block = TsBlock::Spilled {
                        meta,
                        offset,
                        len: resident.data.len() as u32,
                    };
                }
            }
        }
        let mem = cmd.mem_len();
        self.cmds.push_back(cmd);
        self.pushed += 1;
        Ok(mem)
    }

    /// Pop the oldest command, loading a spilled payload back from the
    /// file. Popping a spilled entry from an unsealed segment seals it
    /// first so the file is never read while open for write. Also
    /// returns the in-memory payload bytes the entry was holding.
    pub fn pop(&mut self) -> Result<Option<(TsCmd, usize)>> {
        let needs_seal = matches!(
            self.cmds.front(),
            Some(TsCmd::Send {
                block: TsBlock::Spilled { .. },
                ..
            })
        ) && !self.sealed;
        if needs_seal {
            self.seal();
        }

        let Some(cmd) = self.cmds.pop_front() else {
            return Ok(None);
        };
        let freed = cmd.mem_len();
        match cmd {
            TsCmd::Send {
                slot,
                block: TsBlock::Spilled { meta, offset, len },
                date,
            } => {
                let storage = self
                    .storage
                    .as_mut()
                    .ok_or_else(|| EsOutError::Storage("spilled entry without file".into()))?;
                let (file_meta, payload) = storage.read_record(offset, len)?;
                debug_assert_eq!(file_meta, meta);
                Ok(Some((
                    TsCmd::Send {
                        slot,
                        block: TsBlock::Memory(file_meta.into_block(payload)),
                        date,
                    },
                    freed,
                )))
            }
            other => Ok(Some((other, freed))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::es::Block;
    use pretty_assertions::assert_eq;

    fn send_cmd(slot: usize, byte: u8, date: i64) -> TsCmd {
        TsCmd::Send {
            slot,
            block: TsBlock::Memory(
                Block::new(vec![byte; 3])
                    .with_pts(100 + i64::from(byte))
                    .with_key_flag(byte % 2 == 0),
            ),
            date,
        }
    }

    #[test]
    fn test_record_roundtrip() {
        let meta = BlockMeta {
            pts: Some(42),
            dts: None,
            duration: Some(7),
            is_key: true,
            is_preroll: false,
        };
        let record = encode_record(&meta, b"abc");
        assert_eq!(record.len(), RECORD_HEADER_LEN + 3);
        let (decoded, len) = decode_header(record[..RECORD_HEADER_LEN].try_into().unwrap());
        assert_eq!(decoded, meta);
        assert_eq!(len, 3);
    }

    #[test]
    fn test_capacity_by_command_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut seg = Segment::new(2, u64::MAX);
        seg.push(send_cmd(0, 1, 10), false, dir.path()).unwrap();
        assert!(!seg.is_full());
        seg.push(send_cmd(0, 2, 20), false, dir.path()).unwrap();
        assert!(seg.is_full());
        // Capacity accounting survives pops.
        seg.pop().unwrap().unwrap();
        assert!(seg.is_full());
    }

    #[test]
    fn test_spill_and_reload_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut seg = Segment::new(16, u64::MAX);
        for i in 0..3 {
            seg.push(send_cmd(0, i, i64::from(i) * 10), true, dir.path())
                .unwrap();
        }
        // Spilled payloads hold no memory.
        for i in 0..3u8 {
            let (cmd, freed) = seg.pop().unwrap().unwrap();
            assert_eq!(freed, 0);
            let TsCmd::Send {
                block: TsBlock::Memory(block),
                date,
                ..
            } = cmd
            else {
                panic!("expected resident send");
            };
            assert_eq!(date, i64::from(i) * 10);
            assert_eq!(block.data.as_ref(), &[i; 3]);
            assert_eq!(block.pts, Some(100 + i64::from(i)));
        }
        assert!(seg.pop().unwrap().is_none());
        // Popping a spilled entry sealed the segment.
        assert!(seg.is_sealed());
    }

    #[test]
    fn test_file_unlinked_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut seg = Segment::new(16, u64::MAX);
            seg.push(send_cmd(0, 9, 0), true, dir.path()).unwrap();
            seg.storage.as_ref().unwrap().path.clone()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_push_mem_accounting() {
        let dir = tempfile::tempdir().unwrap();
        let mut seg = Segment::new(16, u64::MAX);
        let resident = seg.push(send_cmd(0, 1, 0), false, dir.path()).unwrap();
        assert_eq!(resident, 3);
        let spilled = seg.push(send_cmd(0, 2, 0), true, dir.path()).unwrap();
        assert_eq!(spilled, 0);
    }
}
