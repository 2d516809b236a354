//! Binary codec of the learner state file
//!
//! Layout (little-endian):
//!
//! ```text
//! magic "LTRS" | version u32 | epoch u64 | step u64 | payload length u64 | payload
//! ```
//!
//! The payload is the bincode encoding of a [`TrainerCheckpoint`].

use bytes::{BufMut, Bytes, BytesMut};
use train_core::{Epoch, Error, Result, Step, TrainerCheckpoint};

/// Magic bytes of state files
pub const STATE_MAGIC: [u8; 4] = *b"LTRS";

/// State file format version
pub const STATE_VERSION: u32 = 1;

const HEADER_LEN: usize = 4 + 4 + 8 + 8 + 8;

/// Fixed-size header preceding the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHeader {
    pub version: u32,
    pub epoch: Epoch,
    pub step: Step,
    pub payload_len: u64,
}

impl StateHeader {
    fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(&STATE_MAGIC);
        buf.put_u32_le(self.version);
        buf.put_u64_le(self.epoch);
        buf.put_u64_le(self.step);
        buf.put_u64_le(self.payload_len);
    }

    fn read(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN || data[..4] != STATE_MAGIC {
            return None;
        }
        let u32_at = |at: usize| data[at..at + 4].try_into().ok().map(u32::from_le_bytes);
        let u64_at = |at: usize| data[at..at + 8].try_into().ok().map(u64::from_le_bytes);
        Some(Self {
            version: u32_at(4)?,
            epoch: u64_at(8)?,
            step: u64_at(16)?,
            payload_len: u64_at(24)?,
        })
    }
}

/// Encode a learner checkpoint into a state file
pub fn encode_state(checkpoint: &TrainerCheckpoint) -> Result<Bytes> {
    let payload = bincode::serialize(checkpoint)
        .map_err(|e| Error::Serialization(format!("state file payload: {}", e)))?;

    let header = StateHeader {
        version: STATE_VERSION,
        epoch: checkpoint.epoch,
        step: checkpoint.step,
        payload_len: payload.len() as u64,
    };

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    header.write(&mut buf);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Decode a state file; `path` is only used in error messages
///
/// # Errors
/// `CheckpointCorrupted` on a bad magic, an unknown version, a truncated
/// payload, or a header that disagrees with the payload.
pub fn decode_state(path: &str, data: &[u8]) -> Result<TrainerCheckpoint> {
    let corrupted = |reason: String| Error::CheckpointCorrupted {
        path: path.to_string(),
        reason,
    };

    let header =
        StateHeader::read(data).ok_or_else(|| corrupted("missing or invalid header".to_string()))?;
    if header.version != STATE_VERSION {
        return Err(corrupted(format!(
            "unsupported version {} (expected {})",
            header.version, STATE_VERSION
        )));
    }

    let payload = &data[HEADER_LEN..];
    if payload.len() as u64 != header.payload_len {
        return Err(corrupted(format!(
            "payload is {} bytes, header says {}",
            payload.len(),
            header.payload_len
        )));
    }

    let checkpoint: TrainerCheckpoint =
        bincode::deserialize(payload).map_err(|e| corrupted(format!("bad payload: {}", e)))?;
    if checkpoint.epoch != header.epoch || checkpoint.step != header.step {
        return Err(corrupted(format!(
            "header is epoch {} step {}, payload is epoch {} step {}",
            header.epoch, header.step, checkpoint.epoch, checkpoint.step
        )));
    }
    Ok(checkpoint)
}
