//! Buffer codec: wire primitives shared by every packet encoder/decoder.
//!
//! Primitives are big-endian. Strings and opaque byte strings share the
//! same wire shape: `u32 length | bytes`, no null terminator. All reads
//! are bounds-checked against the remaining buffer before touching it, so
//! a truncated packet fails with [`crate::Error::Protocol`] rather than
//! panicking.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};

/// Write a UTF-8 string as an SFTP string (`u32 length | utf-8 bytes`).
pub fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Write an opaque byte string as an SFTP string (`u32 length | bytes`).
///
/// Used for handles and extension payloads, which are not guaranteed to
/// be valid UTF-8.
pub fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

fn check_remaining(buf: &[u8], n: usize, what: &str) -> Result<()> {
    if buf.len() < n {
        return Err(Error::Protocol(format!(
            "short packet: need {n} bytes for {what}, have {}",
            buf.len()
        )));
    }
    Ok(())
}

/// Read a `u8`, failing with [`crate::Error::Protocol`] on a short buffer.
pub fn get_u8(buf: &mut &[u8]) -> Result<u8> {
    check_remaining(buf, 1, "u8")?;
    Ok(buf.get_u8())
}

/// Read a big-endian `u32`, failing with [`crate::Error::Protocol`] on a short buffer.
pub fn get_u32(buf: &mut &[u8]) -> Result<u32> {
    check_remaining(buf, 4, "u32")?;
    Ok(buf.get_u32())
}

/// Read a big-endian `u64`, failing with [`crate::Error::Protocol`] on a short buffer.
pub fn get_u64(buf: &mut &[u8]) -> Result<u64> {
    check_remaining(buf, 8, "u64")?;
    Ok(buf.get_u64())
}

/// Read an SFTP string as UTF-8, failing on a truncated length prefix,
/// a length exceeding the remaining buffer, or invalid UTF-8.
pub fn get_string(buf: &mut &[u8]) -> Result<String> {
    let bytes = get_bytes(buf)?;
    String::from_utf8(bytes).map_err(|e| Error::Protocol(format!("invalid UTF-8 string: {e}")))
}

/// Read an SFTP string as raw bytes (used for handles and extension data).
pub fn get_bytes(buf: &mut &[u8]) -> Result<Vec<u8>> {
    let len = get_u32(buf)? as usize;
    check_remaining(buf, len, "string body")?;
    let data = buf[..len].to_vec();
    buf.advance(len);
    Ok(data)
}

/// Build into a pre-sized buffer with a reserved 4-byte length header,
/// then backfill the header with the final encoded length.
///
/// This mirrors the packet marshaling contract in the design: the caller
/// writes type, id and body through `encode`, and the length prefix is
/// computed from what was actually written rather than pre-measured,
/// avoiding a second allocation.
pub fn with_length_prefix(encode: impl FnOnce(&mut BytesMut)) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u32(0); // placeholder, filled below
    encode(&mut buf);
    let len = (buf.len() - 4) as u32;
    buf[0..4].copy_from_slice(&len.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "/home/user/file.txt");
        let mut slice = &buf[..];
        assert_eq!(get_string(&mut slice).unwrap(), "/home/user/file.txt");
        assert!(slice.is_empty());
    }

    #[test]
    fn empty_string_round_trip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "");
        let mut slice = &buf[..];
        assert_eq!(get_string(&mut slice).unwrap(), "");
    }

    #[test]
    fn truncated_length_prefix_is_short_packet() {
        let buf = [0u8, 0, 0];
        let mut slice = &buf[..];
        assert!(get_string(&mut slice).is_err());
    }

    #[test]
    fn length_exceeding_remaining_is_short_packet() {
        let mut buf = BytesMut::new();
        buf.put_u32(100);
        buf.put_slice(b"short");
        let mut slice = &buf[..];
        assert!(get_string(&mut slice).is_err());
    }

    #[test]
    fn with_length_prefix_computes_exact_length() {
        let buf = with_length_prefix(|b| {
            b.put_u8(7);
            put_string(b, "hello");
        });
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len as usize, buf.len() - 4);
    }
}
