//! Log entry types and serialization.

use crate::error::{CoreError, CoreResult};
use crate::types::{LogPosition, TransactionId};

/// Frame header: type (1) + payload length (4).
pub const FRAME_HEADER_SIZE: usize = 5;

/// Frame trailer: crc32 over type, length and payload.
pub const FRAME_CRC_SIZE: usize = 4;

/// Largest payload the writer produces. A longer length field can only be
/// garbage.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024; // 64 MB

/// Type of a log entry.
///
/// Byte `0` is never a valid type so that zero padding at the end of a
/// pre-allocated segment cannot be mistaken for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryType {
    /// Start of a transaction.
    Start = 1,
    /// A chunk of storage commands.
    CommandBatch = 2,
    /// Transaction committed.
    Commit = 3,
    /// Transaction rolled back.
    Rollback = 4,
    /// Checkpoint marker.
    Checkpoint = 5,
}

impl EntryType {
    /// Converts a byte to an entry type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Start),
            2 => Some(Self::CommandBatch),
            3 => Some(Self::Commit),
            4 => Some(Self::Rollback),
            5 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts the entry type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A single storage mutation.
///
/// Recovery only looks at `entity`; the images are interpreted by the
/// storage engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Entity the command touches.
    pub entity: u64,
    /// Image before the change, `None` if the entity did not exist.
    pub before: Option<Vec<u8>>,
    /// Image after the change, `None` if the entity was deleted.
    pub after: Option<Vec<u8>>,
}

impl Command {
    /// A command creating `entity`.
    #[must_use]
    pub fn create(entity: u64, after: impl Into<Vec<u8>>) -> Self {
        Self {
            entity,
            before: None,
            after: Some(after.into()),
        }
    }

    /// A command replacing the image of `entity`.
    #[must_use]
    pub fn update(entity: u64, before: impl Into<Vec<u8>>, after: impl Into<Vec<u8>>) -> Self {
        Self {
            entity,
            before: Some(before.into()),
            after: Some(after.into()),
        }
    }

    /// A command deleting `entity`.
    #[must_use]
    pub fn delete(entity: u64, before: impl Into<Vec<u8>>) -> Self {
        Self {
            entity,
            before: Some(before.into()),
            after: None,
        }
    }
}

/// One chunk of a transaction's commands.
///
/// Large transactions are split into several batches; only the final one
/// has `is_last` set. Batches of different transactions may interleave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBatch {
    /// Owning transaction.
    pub tx_id: TransactionId,
    /// Zero-based chunk number within the transaction.
    pub chunk: u32,
    /// Whether this is the transaction's final chunk.
    pub is_last: bool,
    /// Commands in application order.
    pub commands: Vec<Command>,
}

impl CommandBatch {
    /// Creates a single-chunk batch.
    #[must_use]
    pub fn single(tx_id: TransactionId, commands: Vec<Command>) -> Self {
        Self {
            tx_id,
            chunk: 0,
            is_last: true,
            commands,
        }
    }

    /// Serializes the batch payload into `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if a length does not fit the on-disk format.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> CoreResult<()> {
        buf.extend_from_slice(&self.tx_id.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.chunk.to_le_bytes());
        buf.push(u8::from(self.is_last));
        buf.extend_from_slice(&encode_len(self.commands.len(), "command count")?.to_le_bytes());
        for command in &self.commands {
            buf.extend_from_slice(&command.entity.to_le_bytes());
            encode_optional_bytes(buf, command.before.as_deref())?;
            encode_optional_bytes(buf, command.after.as_deref())?;
        }
        Ok(())
    }

    fn decode(reader: &mut PayloadReader<'_>) -> CoreResult<Self> {
        let tx_id = TransactionId::new(reader.u64()?);
        let chunk = reader.u32()?;
        let is_last = reader.flag()?;
        let count = reader.u32()? as usize;
        // Each command takes at least 10 bytes; guards the allocation below.
        if count > reader.remaining() / 10 {
            return Err(reader.corruption(format!("command count {count} exceeds payload")));
        }
        let mut commands = Vec::with_capacity(count);
        for _ in 0..count {
            let entity = reader.u64()?;
            let before = reader.optional_bytes()?;
            let after = reader.optional_bytes()?;
            commands.push(Command {
                entity,
                before,
                after,
            });
        }
        Ok(Self {
            tx_id,
            chunk,
            is_last,
            commands,
        })
    }
}

/// Incremental checksum over a transaction's encoded command batches.
///
/// Written into `Commit` and `Rollback` entries and verified when the
/// transaction is read back.
#[derive(Default, Clone)]
pub struct TransactionChecksum {
    hasher: crc32fast::Hasher,
    scratch: Vec<u8>,
}

impl TransactionChecksum {
    /// Creates an empty checksum.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the next batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be encoded.
    pub fn update(&mut self, batch: &CommandBatch) -> CoreResult<()> {
        self.scratch.clear();
        batch.encode_into(&mut self.scratch)?;
        self.hasher.update(&self.scratch);
        Ok(())
    }

    /// Returns the checksum of all batches fed so far.
    #[must_use]
    pub fn finish(self) -> u32 {
        self.hasher.finalize()
    }

    /// Computes the checksum of `batches` in order.
    ///
    /// # Errors
    ///
    /// Returns an error if a batch cannot be encoded.
    pub fn of<'a>(batches: impl IntoIterator<Item = &'a CommandBatch>) -> CoreResult<u32> {
        let mut checksum = Self::new();
        for batch in batches {
            checksum.update(batch)?;
        }
        Ok(checksum.finish())
    }
}

/// An entry in the transaction log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    /// Start of a transaction.
    Start {
        /// Transaction ID.
        tx_id: TransactionId,
        /// Wall clock time in milliseconds.
        timestamp: u64,
        /// Where the entry begins. Filled in by the reader, not encoded.
        position: LogPosition,
    },

    /// A chunk of commands.
    CommandBatch(CommandBatch),

    /// Transaction committed.
    Commit {
        /// Transaction ID.
        tx_id: TransactionId,
        /// Wall clock time in milliseconds.
        timestamp: u64,
        /// Checksum of the transaction's command batches.
        checksum: u32,
    },

    /// Transaction rolled back.
    Rollback {
        /// Transaction ID.
        tx_id: TransactionId,
        /// Wall clock time in milliseconds.
        timestamp: u64,
        /// Checksum of the command batches that were written.
        checksum: u32,
    },

    /// Storage is consistent up to `position`.
    Checkpoint {
        /// Position recovery may resume from.
        position: LogPosition,
        /// Last transaction applied at the time of the checkpoint.
        last_tx_id: TransactionId,
        /// Wall clock time in milliseconds.
        timestamp: u64,
        /// Human readable reason.
        reason: String,
    },
}

impl LogEntry {
    /// Creates a start entry. The position is assigned when read back.
    #[must_use]
    pub const fn start(tx_id: TransactionId, timestamp: u64) -> Self {
        Self::Start {
            tx_id,
            timestamp,
            position: LogPosition::UNSPECIFIED,
        }
    }

    /// Returns the entry type.
    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        match self {
            Self::Start { .. } => EntryType::Start,
            Self::CommandBatch(_) => EntryType::CommandBatch,
            Self::Commit { .. } => EntryType::Commit,
            Self::Rollback { .. } => EntryType::Rollback,
            Self::Checkpoint { .. } => EntryType::Checkpoint,
        }
    }

    /// Returns the transaction ID if this entry belongs to one.
    #[must_use]
    pub fn tx_id(&self) -> Option<TransactionId> {
        match self {
            Self::Start { tx_id, .. }
            | Self::Commit { tx_id, .. }
            | Self::Rollback { tx_id, .. } => Some(*tx_id),
            Self::CommandBatch(batch) => Some(batch.tx_id),
            Self::Checkpoint { .. } => None,
        }
    }

    /// Serializes the entry payload (without framing).
    ///
    /// # Errors
    ///
    /// Returns an error if a length does not fit the on-disk format.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();

        match self {
            Self::Start {
                tx_id, timestamp, ..
            } => {
                buf.extend_from_slice(&tx_id.as_u64().to_le_bytes());
                buf.extend_from_slice(&timestamp.to_le_bytes());
            }

            Self::CommandBatch(batch) => batch.encode_into(&mut buf)?,

            Self::Commit {
                tx_id,
                timestamp,
                checksum,
            }
            | Self::Rollback {
                tx_id,
                timestamp,
                checksum,
            } => {
                buf.extend_from_slice(&tx_id.as_u64().to_le_bytes());
                buf.extend_from_slice(&timestamp.to_le_bytes());
                buf.extend_from_slice(&checksum.to_le_bytes());
            }

            Self::Checkpoint {
                position,
                last_tx_id,
                timestamp,
                reason,
            } => {
                buf.extend_from_slice(&position.segment_version.to_le_bytes());
                buf.extend_from_slice(&position.byte_offset.to_le_bytes());
                buf.extend_from_slice(&last_tx_id.as_u64().to_le_bytes());
                buf.extend_from_slice(&timestamp.to_le_bytes());
                buf.extend_from_slice(&encode_len(reason.len(), "checkpoint reason")?.to_le_bytes());
                buf.extend_from_slice(reason.as_bytes());
            }
        }

        Ok(buf)
    }

    /// Serializes the full frame: type, length, payload and crc32.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not fit the on-disk format.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CoreError::invalid_argument(format!(
                "entry payload too large: {} bytes (max {MAX_PAYLOAD_SIZE})",
                payload.len()
            )));
        }
        let len = encode_len(payload.len(), "entry payload")?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len() + FRAME_CRC_SIZE);
        frame.push(self.entry_type().as_byte());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    /// Deserializes an entry from its type and payload.
    ///
    /// `position` is where the entry begins; it is stored in `Start`
    /// entries and used in error messages.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the payload is malformed.
    pub fn decode_payload(
        entry_type: EntryType,
        payload: &[u8],
        position: LogPosition,
    ) -> CoreResult<Self> {
        let mut reader = PayloadReader::new(payload, position);

        let entry = match entry_type {
            EntryType::Start => Self::Start {
                tx_id: TransactionId::new(reader.u64()?),
                timestamp: reader.u64()?,
                position,
            },

            EntryType::CommandBatch => Self::CommandBatch(CommandBatch::decode(&mut reader)?),

            EntryType::Commit => Self::Commit {
                tx_id: TransactionId::new(reader.u64()?),
                timestamp: reader.u64()?,
                checksum: reader.u32()?,
            },

            EntryType::Rollback => Self::Rollback {
                tx_id: TransactionId::new(reader.u64()?),
                timestamp: reader.u64()?,
                checksum: reader.u32()?,
            },

            EntryType::Checkpoint => {
                let resume = LogPosition::new(reader.u64()?, reader.u64()?);
                let last_tx_id = TransactionId::new(reader.u64()?);
                let timestamp = reader.u64()?;
                let len = reader.u32()? as usize;
                let reason = String::from_utf8(reader.bytes(len)?.to_vec())
                    .map_err(|_| reader.corruption("checkpoint reason is not UTF-8"))?;
                Self::Checkpoint {
                    position: resume,
                    last_tx_id,
                    timestamp,
                    reason,
                }
            }
        };

        reader.finish(entry_type)?;
        Ok(entry)
    }
}

fn encode_len(len: usize, what: &str) -> CoreResult<u32> {
    u32::try_from(len)
        .map_err(|_| CoreError::invalid_argument(format!("{what} too large: {len}")))
}

fn encode_optional_bytes(buf: &mut Vec<u8>, bytes: Option<&[u8]>) -> CoreResult<()> {
    match bytes {
        Some(bytes) => {
            buf.push(1);
            buf.extend_from_slice(&encode_len(bytes.len(), "command image")?.to_le_bytes());
            buf.extend_from_slice(bytes);
        }
        None => buf.push(0),
    }
    Ok(())
}

/// Bounds-checked cursor over an entry payload.
struct PayloadReader<'a> {
    payload: &'a [u8],
    cursor: usize,
    position: LogPosition,
}

impl<'a> PayloadReader<'a> {
    fn new(payload: &'a [u8], position: LogPosition) -> Self {
        Self {
            payload,
            cursor: 0,
            position,
        }
    }

    fn corruption(&self, message: impl Into<String>) -> CoreError {
        CoreError::log_corruption(self.position, message)
    }

    fn remaining(&self) -> usize {
        self.payload.len() - self.cursor
    }

    fn bytes(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(self.corruption("unexpected end of payload"));
        }
        let slice = &self.payload[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(slice)
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.bytes(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn flag(&mut self) -> CoreResult<bool> {
        match self.bytes(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(self.corruption(format!("invalid flag byte {other}"))),
        }
    }

    fn optional_bytes(&mut self) -> CoreResult<Option<Vec<u8>>> {
        if !self.flag()? {
            return Ok(None);
        }
        let len = self.u32()? as usize;
        Ok(Some(self.bytes(len)?.to_vec()))
    }

    fn finish(&self, entry_type: EntryType) -> CoreResult<()> {
        if self.cursor != self.payload.len() {
            return Err(self.corruption(format!(
                "trailing bytes in {entry_type:?} entry: expected {} bytes, got {}",
                self.cursor,
                self.payload.len()
            )));
        }
        Ok(())
    }
}
