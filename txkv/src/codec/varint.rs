use bytes::BufMut;

use crate::error::{CResult, Error};

/// Variable-length u64 encoding that preserves the numeric order under
/// bytewise comparison: a length byte (0 to 8) followed by the minimal
/// big-endian bytes of the value. A smaller value either needs fewer bytes
/// (smaller length byte) or compares below byte by byte at equal length.
///
/// 0 encodes as a single 0x00 byte; u64::MAX as 0x08 followed by eight 0xff
/// bytes. The encoding is self-delimiting, so encoded values can be
/// concatenated into composite keys and still scanned as prefixes.
pub fn encode_u64(n: u64, output: &mut impl BufMut) {
    let bytes = n.to_be_bytes();
    let skip = n.leading_zeros() as usize / 8;
    output.put_u8((8 - skip) as u8);
    output.put_slice(&bytes[skip..]);
}

/// Encodes a u64 into a fresh buffer.
pub fn encode_u64_vec(n: u64) -> Vec<u8> {
    let mut output = Vec::with_capacity(9);
    encode_u64(n, &mut output);
    output
}

/// Decodes a u64 from the front of the slice, advancing it past the consumed
/// bytes. Rejects truncated and non-minimal encodings, since the latter
/// would break the ordering guarantee.
pub fn take_u64(input: &mut &[u8]) -> CResult<u64> {
    let (&len, rest) = input
        .split_first()
        .ok_or_else(|| Error::InvalidData("unexpected end of varint".to_string()))?;
    let len = len as usize;
    if len > 8 {
        return Err(Error::InvalidData(format!("invalid varint length {}", len)));
    }
    if rest.len() < len {
        return Err(Error::InvalidData("truncated varint".to_string()));
    }
    if len > 0 && rest[0] == 0 {
        return Err(Error::InvalidData("non-minimal varint".to_string()));
    }
    let mut n = 0u64;
    for &b in &rest[..len] {
        n = n << 8 | b as u64;
    }
    *input = &rest[len..];
    Ok(n)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn roundtrip() -> CResult<()> {
        for n in [
            0,
            1,
            127,
            255,
            256,
            u32::MAX as u64,
            u32::MAX as u64 + 1,
            u64::MAX - 1,
            u64::MAX,
        ] {
            let encoded = encode_u64_vec(n);
            let mut slice = encoded.as_slice();
            assert_eq!(take_u64(&mut slice)?, n);
            assert!(slice.is_empty());
        }
        Ok(())
    }

    #[test]
    fn ordering() {
        // Bytewise order of encodings must match numeric order.
        let ns = [0, 1, 2, 255, 256, 257, 65535, 65536, 1 << 32, u64::MAX];
        for pair in ns.windows(2) {
            assert!(encode_u64_vec(pair[0]) < encode_u64_vec(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn self_delimiting() -> CResult<()> {
        let mut buf = Vec::new();
        encode_u64(7, &mut buf);
        encode_u64(70000, &mut buf);
        let mut slice = buf.as_slice();
        assert_eq!(take_u64(&mut slice)?, 7);
        assert_eq!(take_u64(&mut slice)?, 70000);
        assert!(slice.is_empty());
        Ok(())
    }

    #[test]
    fn invalid() {
        // Empty input.
        assert!(take_u64(&mut &[][..]).is_err());
        // Truncated payload.
        assert!(take_u64(&mut &[2u8, 1][..]).is_err());
        // Length byte out of range.
        assert!(take_u64(&mut &[9u8, 1, 1, 1, 1, 1, 1, 1, 1, 1][..]).is_err());
        // Non-minimal: 1 encoded with a leading zero byte.
        assert!(take_u64(&mut &[2u8, 0, 1][..]).is_err());
    }
}
