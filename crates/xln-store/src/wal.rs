//! Write-ahead log.
//!
//! File layout: a concatenation of frames, each
//! `len_be(4) ‖ RLP(entry) ‖ sha256(RLP(entry))[0..4]`.
//! A torn tail or a checksum mismatch truncates recovery at the last good
//! entry; a frame that checksums but does not decode is a hard error.
//!
//! The driver records `TickInput` with the tick the inputs are about to
//! produce (`env.tick + 1`), and `TickOutput` with the tick that produced
//! the messages, so replay can both re-run and cross-check.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tracing::{debug, warn};

use xln_codec::{list_of, vec_of, CodecError, Item, Rlp};
use xln_crypto::sha256;
use xln_entity::EntityInput;

use crate::StoreError;

// ── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Inputs submitted to the tick that will advance the env to `tick`.
    TickInput { tick: u64, now_ts: u64, inputs: Vec<EntityInput> },

    /// Messages the tick numbered `tick` emitted.
    TickOutput { tick: u64, messages: Vec<EntityInput> },

    /// A snapshot of the env as of `tick` lives at `path`.
    SnapshotRef { tick: u64, path: String },
}

const TAG_TICK_INPUT: u64 = 0;
const TAG_TICK_OUTPUT: u64 = 1;
const TAG_SNAPSHOT_REF: u64 = 2;

impl Rlp for WalRecord {
    fn to_item(&self) -> Item {
        match self {
            WalRecord::TickInput { tick, now_ts, inputs } => Item::list(vec![
                Item::uint(TAG_TICK_INPUT as u128),
                Item::uint(*tick as u128),
                Item::uint(*now_ts as u128),
                list_of(inputs),
            ]),
            WalRecord::TickOutput { tick, messages } => Item::list(vec![
                Item::uint(TAG_TICK_OUTPUT as u128),
                Item::uint(*tick as u128),
                list_of(messages),
            ]),
            WalRecord::SnapshotRef { tick, path } => Item::list(vec![
                Item::uint(TAG_SNAPSHOT_REF as u128),
                Item::uint(*tick as u128),
                Item::bytes(path.as_bytes()),
            ]),
        }
    }

    fn from_item(item: &Item) -> Result<Self, CodecError> {
        let fields = item.as_list()?;
        let tag = fields
            .first()
            .ok_or(CodecError::Malformed("empty wal record"))?
            .as_u64()?;
        match (tag, fields) {
            (TAG_TICK_INPUT, [_, tick, now_ts, inputs]) => Ok(WalRecord::TickInput {
                tick: tick.as_u64()?,
                now_ts: now_ts.as_u64()?,
                inputs: vec_of(inputs)?,
            }),
            (TAG_TICK_OUTPUT, [_, tick, messages]) => Ok(WalRecord::TickOutput {
                tick: tick.as_u64()?,
                messages: vec_of(messages)?,
            }),
            (TAG_SNAPSHOT_REF, [_, tick, path]) => Ok(WalRecord::SnapshotRef {
                tick: tick.as_u64()?,
                path: String::from_utf8(path.as_bytes()?.to_vec())
                    .map_err(|_| CodecError::Malformed("snapshot path is not utf-8"))?,
            }),
            _ => Err(CodecError::Malformed("unknown wal record shape")),
        }
    }
}

// ── File operations ──────────────────────────────────────────────────────────

/// Append one framed record. The file is created on first use.
pub fn append_wal<P: AsRef<Path>>(path: P, record: &WalRecord) -> Result<(), StoreError> {
    let body = record.to_rlp();
    let digest = sha256(&body);

    let mut frame = Vec::with_capacity(4 + body.len() + 4);
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&digest[..4]);

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&frame)?;
    Ok(())
}

/// Read every intact record. Recovery stops, without error, at the
/// first torn or checksum-failing frame; everything before it is good.
pub fn read_wal<P: AsRef<Path>>(path: P) -> Result<Vec<WalRecord>, StoreError> {
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    let mut cursor = 0usize;
    while cursor < bytes.len() {
        let Some(header) = bytes.get(cursor..cursor + 4) else {
            warn!(at = cursor, "torn wal header, truncating");
            break;
        };
        let len = u32::from_be_bytes(header.try_into().expect("slice is four bytes")) as usize;
        let body_start = cursor + 4;
        let Some(body) = bytes.get(body_start..body_start + len) else {
            warn!(at = cursor, "torn wal body, truncating");
            break;
        };
        let Some(stored_sum) = bytes.get(body_start + len..body_start + len + 4) else {
            warn!(at = cursor, "torn wal checksum, truncating");
            break;
        };
        if stored_sum != &sha256(body)[..4] {
            warn!(at = cursor, "wal checksum mismatch, truncating");
            break;
        }
        records.push(WalRecord::from_rlp(body)?);
        cursor = body_start + len + 4;
    }
    debug!(count = records.len(), "wal read");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use xln_core::{EntityId, SignerId};

    fn temp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("xln_wal_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn records() -> Vec<WalRecord> {
        let msg = EntityInput::to(EntityId::from_low_u64(1), SignerId::UNROUTED);
        vec![
            WalRecord::TickInput { tick: 1, now_ts: 100, inputs: vec![msg.clone()] },
            WalRecord::TickOutput { tick: 1, messages: vec![msg] },
            WalRecord::SnapshotRef { tick: 1, path: "snap-1.bin".into() },
        ]
    }

    #[test]
    fn append_then_read_roundtrips() {
        let path = temp_path("roundtrip.wal");
        for record in &records() {
            append_wal(&path, record).unwrap();
        }
        assert_eq!(read_wal(&path).unwrap(), records());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_reads_empty() {
        assert!(read_wal(temp_path("absent.wal")).unwrap().is_empty());
    }

    #[test]
    fn torn_tail_is_discarded() {
        let path = temp_path("torn.wal");
        for record in &records() {
            append_wal(&path, record).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x00, 0x00, 0x00, 0xFF, 0x01]).unwrap();
        drop(file);

        assert_eq!(read_wal(&path).unwrap(), records());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn checksum_flip_truncates_at_last_good_entry() {
        let path = temp_path("corrupt.wal");
        let all = records();
        append_wal(&path, &all[0]).unwrap();
        let first_len = std::fs::read(&path).unwrap().len();
        append_wal(&path, &all[1]).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[first_len + 6] ^= 0xFF; // inside the second record's body
        std::fs::write(&path, &bytes).unwrap();

        assert_eq!(read_wal(&path).unwrap(), vec![all[0].clone()]);
        let _ = std::fs::remove_file(&path);
    }
}
