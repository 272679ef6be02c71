use crate::codec::varint;
use crate::error::{CResult, Error};
use crate::mvcc::version::VersionedValue;
use crate::mvcc::MapId;

/// The kind of write an undo entry reverts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UndoOp {
    /// The slot was empty or a tombstone, and a value was written.
    Add = 1,
    /// An existing value was replaced, or a tombstone overwritten by one.
    Set = 2,
    /// An existing value was tombstoned.
    Remove = 3,
}

impl UndoOp {
    fn from_u64(n: u64) -> CResult<Self> {
        match n {
            1 => Ok(UndoOp::Add),
            2 => Ok(UndoOp::Set),
            3 => Ok(UndoOp::Remove),
            n => Err(Error::InvalidData(format!("invalid undo op {}", n))),
        }
    }
}

/// One record of the persistent undo log, keyed by (transaction id, log id).
/// Appended on every write; consumed forward on commit, backward on rollback,
/// and surfaced by recovery for transactions that never closed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UndoEntry {
    pub op: UndoOp,

    /// The map the write touched.
    pub map_id: MapId,

    /// The encoded user key within that map.
    pub key: Vec<u8>,

    /// The versioned value the slot held before the write, or None if the
    /// slot was empty. Rollback restores exactly this.
    pub old: Option<VersionedValue>,
}

impl UndoEntry {
    /// Encodes the record with a presence byte per field. The old value
    /// comes last so its payload can run to the end of the buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(1);
        varint::encode_u64(self.op as u64, &mut buf);
        buf.push(1);
        varint::encode_u64(self.map_id as u64, &mut buf);
        buf.push(1);
        varint::encode_u64(self.key.len() as u64, &mut buf);
        buf.extend_from_slice(&self.key);
        match &self.old {
            Some(old) => {
                buf.push(1);
                old.encode_into(&mut buf);
            }
            None => buf.push(0),
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> CResult<Self> {
        let mut input = bytes;
        let op = UndoOp::from_u64(take_field(&mut input, "op", varint::take_u64)?)?;
        let map_id = take_field(&mut input, "map id", varint::take_u64)?;
        let map_id = MapId::try_from(map_id)
            .map_err(|_| Error::InvalidData(format!("map id {} out of range", map_id)))?;
        let key_len = take_field(&mut input, "key", varint::take_u64)? as usize;
        if input.len() < key_len {
            return Err(Error::InvalidData("truncated undo key".to_string()));
        }
        let key = input[..key_len].to_vec();
        input = &input[key_len..];
        let old = match take_presence(&mut input, "old value")? {
            false => None,
            true => Some(VersionedValue::decode_from(&mut input)?),
        };
        if !input.is_empty() {
            return Err(Error::InvalidData("trailing bytes in undo entry".to_string()));
        }
        Ok(Self { op, map_id, key, old })
    }
}

fn take_presence(input: &mut &[u8], field: &str) -> CResult<bool> {
    let (&present, rest) = input
        .split_first()
        .ok_or_else(|| Error::InvalidData(format!("missing {} in undo entry", field)))?;
    *input = rest;
    match present {
        0 => Ok(false),
        1 => Ok(true),
        b => Err(Error::InvalidData(format!("invalid presence byte {:#04x}", b))),
    }
}

fn take_field<T>(
    input: &mut &[u8],
    field: &str,
    take: impl Fn(&mut &[u8]) -> CResult<T>,
) -> CResult<T> {
    if !take_presence(input, field)? {
        return Err(Error::InvalidData(format!("unexpected null {} in undo entry", field)));
    }
    take(input)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn roundtrip() -> CResult<()> {
        for entry in [
            UndoEntry { op: UndoOp::Add, map_id: 1, key: vec![0x61], old: None },
            UndoEntry {
                op: UndoOp::Set,
                map_id: 7,
                key: vec![],
                old: Some(VersionedValue::new(3, 2, Some(vec![1, 2]))),
            },
            UndoEntry {
                op: UndoOp::Remove,
                map_id: MapId::MAX,
                key: vec![0x00, 0xff],
                old: Some(VersionedValue::new(9, 0, None)),
            },
        ] {
            assert_eq!(UndoEntry::decode(&entry.encode())?, entry);
        }
        Ok(())
    }

    #[test]
    fn decode_garbage() {
        assert!(UndoEntry::decode(&[]).is_err());
        assert!(UndoEntry::decode(&[1, 1, 9]).is_err());
        // Undo op outside the known range.
        let mut bad = UndoEntry { op: UndoOp::Add, map_id: 0, key: vec![], old: None }.encode();
        bad[1] = 0x01;
        bad[2] = 0x09;
        assert!(UndoEntry::decode(&bad).is_err());
    }
}
