use crate::codec::varint;
use crate::error::{CResult, Error};
use crate::mvcc::{LogId, TxId};

/// The value stored in every slot of a transactional map: the encoded user
/// value stamped with the transaction and log id that wrote it. There is no
/// "raw" slot; even committed values keep their stamp, and readers decide
/// visibility by checking whether the writing transaction is still open.
///
/// A `None` value is a tombstone: the owning transaction deleted the key,
/// but the slot is kept so readers of other transactions can still chase
/// the undo log for the version they are allowed to see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedValue {
    /// The transaction that wrote this version.
    pub tx_id: TxId,

    /// The writer's undo log position for this write.
    pub log_id: LogId,

    /// The encoded user value, or None for a tombstone.
    pub value: Option<Vec<u8>>,
}

impl VersionedValue {
    pub fn new(tx_id: TxId, log_id: LogId, value: Option<Vec<u8>>) -> Self {
        Self { tx_id, log_id, value }
    }

    /// Whether this version marks the key as deleted.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Encodes as varint(tx_id), varint(log_id), presence byte, then the
    /// payload bytes running to the end of the buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            2 + 9 + 9 + self.value.as_ref().map_or(0, |v| v.len()),
        );
        self.encode_into(&mut buf);
        buf
    }

    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        varint::encode_u64(self.tx_id, buf);
        varint::encode_u64(self.log_id, buf);
        match &self.value {
            Some(value) => {
                buf.push(1);
                buf.extend_from_slice(value);
            }
            None => buf.push(0),
        }
    }

    pub fn decode(bytes: &[u8]) -> CResult<Self> {
        let mut input = bytes;
        let value = Self::decode_from(&mut input)?;
        Ok(value)
    }

    /// Decodes from the front of the slice, consuming the rest of it as the
    /// payload. Versioned values are therefore only embeddable as the final
    /// field of a composite record.
    pub(crate) fn decode_from(input: &mut &[u8]) -> CResult<Self> {
        let tx_id = varint::take_u64(input)?;
        let log_id = varint::take_u64(input)?;
        let (&present, payload) = input
            .split_first()
            .ok_or_else(|| Error::InvalidData("missing payload marker".to_string()))?;
        let value = match present {
            0 => None,
            1 => Some(payload.to_vec()),
            b => {
                return Err(Error::InvalidData(format!(
                    "invalid payload marker {:#04x}",
                    b
                )))
            }
        };
        *input = &[];
        Ok(Self { tx_id, log_id, value })
    }
}
