//! Order-preserving terminated byte strings
//!
//! Variable-length fields are escaped and closed with `0x00`:
//!
//! - `0x00` → `0x01 0x01`
//! - `0x01` → `0x01 0x02`
//! - `0xFF` → `0x01 0x03`
//! - all other bytes unchanged
//!
//! With `0x00` as the terminator a field sorts before any longer field it is
//! a prefix of, and a terminated field can never be confused with the start
//! of a different one.

use crate::{EventStoreError, Result};
use bytes::BufMut;

const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0x01;

/// Append `data` to `buf` in terminated form
pub fn serialize(data: &[u8], buf: &mut impl BufMut) {
    for &byte in data {
        match byte {
            0x00 => buf.put_slice(&[ESCAPE, 0x01]),
            0x01 => buf.put_slice(&[ESCAPE, 0x02]),
            0xFF => buf.put_slice(&[ESCAPE, 0x03]),
            other => buf.put_u8(other),
        }
    }
    buf.put_u8(TERMINATOR);
}

/// Read one terminated field from the front of `data`, advancing it
pub fn deserialize(data: &mut &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        match data[i] {
            TERMINATOR => {
                *data = &data[i + 1..];
                return Ok(out);
            }
            ESCAPE => {
                let escaped = data.get(i + 1).ok_or_else(|| {
                    EventStoreError::MalformedKey("dangling escape byte".into())
                })?;
                out.push(match escaped {
                    0x01 => 0x00,
                    0x02 => 0x01,
                    0x03 => 0xFF,
                    other => {
                        return Err(EventStoreError::MalformedKey(format!(
                            "invalid escape sequence 0x01 0x{:02x}",
                            other
                        )))
                    }
                });
                i += 2;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }

    Err(EventStoreError::MalformedKey("unterminated field".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encoded(data: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        serialize(data, &mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_escapes_reserved_bytes() {
        assert_eq!(encoded(b"ab"), vec![b'a', b'b', 0x00]);
        assert_eq!(
            encoded(&[0x00, 0x01, 0xFF]),
            vec![0x01, 0x01, 0x01, 0x02, 0x01, 0x03, 0x00]
        );
    }

    #[test]
    fn test_deserialize_advances_past_terminator() {
        let mut buf = BytesMut::new();
        serialize(b"first\x00", &mut buf);
        serialize(b"second", &mut buf);

        let mut slice = &buf[..];
        assert_eq!(deserialize(&mut slice).unwrap(), b"first\x00".to_vec());
        assert_eq!(deserialize(&mut slice).unwrap(), b"second".to_vec());
        assert!(slice.is_empty());
    }

    #[test]
    fn test_prefix_sorts_first() {
        assert!(encoded(b"foo") < encoded(b"foo/bar"));
        assert!(encoded(b"foo") < encoded(b"foo\x00"));
    }

    #[test]
    fn test_rejects_malformed_input() {
        let mut unterminated: &[u8] = b"abc";
        assert!(matches!(
            deserialize(&mut unterminated),
            Err(EventStoreError::MalformedKey(_))
        ));

        let mut bad_escape: &[u8] = &[b'a', 0x01, 0x09, 0x00];
        assert!(deserialize(&mut bad_escape).is_err());

        let mut dangling: &[u8] = &[b'a', 0x01];
        assert!(deserialize(&mut dangling).is_err());
    }
}
