//! WAL entry types and serialization

use crate::storage::KeyValue;
use crate::{EventStoreError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// WAL entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalEntryType {
    /// A batch of key-value writes
    Batch = 1,
    /// The index was dropped; the payload holds the surviving sequence keys
    DropIndex = 2,
}

impl TryFrom<u8> for WalEntryType {
    type Error = EventStoreError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(WalEntryType::Batch),
            2 => Ok(WalEntryType::DropIndex),
            _ => Err(EventStoreError::InvalidFormat(format!(
                "Invalid WAL entry type: {}",
                value
            ))),
        }
    }
}

/// A single WAL entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    pub entry_type: WalEntryType,
    /// bincode-encoded key-value pairs
    pub payload: Vec<u8>,
}

impl WalEntry {
    /// Create a batch entry
    pub fn batch(entries: &[KeyValue]) -> Result<Self> {
        Self::with_pairs(WalEntryType::Batch, entries)
    }

    /// Create an index drop marker carrying the sequence keys that survive it
    pub fn drop_index(kept: &[KeyValue]) -> Result<Self> {
        Self::with_pairs(WalEntryType::DropIndex, kept)
    }

    fn with_pairs(entry_type: WalEntryType, entries: &[KeyValue]) -> Result<Self> {
        let pairs: Vec<(&[u8], &[u8])> = entries
            .iter()
            .map(|kv| (kv.key.as_ref(), kv.value.as_ref()))
            .collect();
        let payload =
            bincode::serialize(&pairs).map_err(|e| EventStoreError::InvalidFormat(e.to_string()))?;

        Ok(Self {
            entry_type,
            payload,
        })
    }

    /// Serialize the entry with length prefix and CRC checksum
    ///
    /// Format:
    /// - 4 bytes: entry length (excluding this field)
    /// - 1 byte: entry type
    /// - 4 bytes: payload length
    /// - N bytes: payload
    /// - 4 bytes: CRC32 of type, payload length and payload
    pub fn serialize_with_checksum(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(13 + self.payload.len());

        buf.put_u32_le(0);
        buf.put_u8(self.entry_type as u8);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);

        let checksum = crc32fast::hash(&buf[4..]);
        buf.put_u32_le(checksum);

        let len = (buf.len() - 4) as u32;
        buf[0..4].copy_from_slice(&len.to_le_bytes());

        buf.freeze()
    }

    /// Deserialize an entry, validating its checksum
    ///
    /// Returns the entry and the number of bytes consumed.
    pub fn deserialize_with_checksum(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(EventStoreError::InvalidFormat("Entry too short".into()));
        }

        let len = (&data[..4]).get_u32_le() as usize;
        if len < 9 || data.len() < 4 + len {
            return Err(EventStoreError::InvalidFormat("Incomplete entry".into()));
        }

        let entry_data = &data[4..4 + len];
        let (body, mut trailer) = entry_data.split_at(len - 4);

        let expected = trailer.get_u32_le();
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(EventStoreError::ChecksumMismatch { expected, actual });
        }

        let mut cursor = body;
        let entry_type = WalEntryType::try_from(cursor.get_u8())?;
        let payload_len = cursor.get_u32_le() as usize;
        if cursor.len() != payload_len {
            return Err(EventStoreError::Corruption(format!(
                "WAL payload length {} does not match {} remaining bytes",
                payload_len,
                cursor.len()
            )));
        }

        Ok((
            WalEntry {
                entry_type,
                payload: cursor.to_vec(),
            },
            4 + len,
        ))
    }

    /// The key-value pairs carried by the entry
    pub fn key_values(&self) -> Result<Vec<KeyValue>> {
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = bincode::deserialize(&self.payload)
            .map_err(|e| EventStoreError::InvalidFormat(e.to_string()))?;

        Ok(pairs
            .into_iter()
            .map(|(key, value)| KeyValue::new(key, value))
            .collect())
    }
}
