// This file includes portions of code from https://github.com/erikgrinaker/toydb (Apache 2 License).
// Original Apache 2 License Copyright (c) erikgrinaker 2024.

//! An order-preserving key encoding, so that the bytewise order of encoded
//! keys in the backing engine equals the logical order of the decoded values.
//! Values are serialized through serde, with these encodings:
//!
//! - bool: 0x00 for false, 0x01 for true.
//! - u8..u64: widened to u64, then the order-preserving varint.
//! - i8..i64: widened to i64, then 8 big-endian bytes with the sign bit
//!   flipped so that negative values sort before positive ones.
//! - f32/f64: as f64 bits in big-endian, with the sign bit flipped for
//!   positive numbers and all bits flipped for negative ones.
//! - Byte slices and strings: the raw bytes with 0x00 escaped as 0x00 0xff,
//!   terminated by 0x00 0x00. The terminator sorts a prefix before any
//!   longer key.
//! - Option: 0x00 for None, 0x01 followed by the value for Some.
//! - Tuples, arrays and structs: the concatenated fields.
//! - Enums: the variant index as a single byte, then the fields. Variant
//!   grouping and order follows declaration order, which is what makes
//!   prefix scans over a key enum work.
//!
//! Sequences of unknown length are only decodable in the final position,
//! since the encoding carries no element count. Maps are not supported.

use serde::{de, ser};

use crate::codec::varint;
use crate::error::{CResult, Error};

/// Serializes a key value into its order-preserving byte form.
pub fn serialize<T: ser::Serialize>(value: &T) -> CResult<Vec<u8>> {
    let mut serializer = Serializer { output: Vec::new() };
    value.serialize(&mut serializer)?;
    Ok(serializer.output)
}

/// Deserializes a key value from its byte form. Errors if any input bytes
/// are left over.
pub fn deserialize<'de, T: de::Deserialize<'de>>(input: &'de [u8]) -> CResult<T> {
    let mut deserializer = Deserializer { input };
    let value = T::deserialize(&mut deserializer)?;
    if !deserializer.input.is_empty() {
        return Err(Error::InvalidData(format!(
            "unexpected trailing bytes {:x?} at end of key",
            deserializer.input
        )));
    }
    Ok(value)
}

impl ser::Error for Error {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Error::InvalidData(msg.to_string())
    }
}

impl de::Error for Error {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Error::InvalidData(msg.to_string())
    }
}

struct Serializer {
    output: Vec<u8>,
}

impl Serializer {
    /// Appends raw bytes with 0x00 escaped as 0x00 0xff, followed by the
    /// 0x00 0x00 terminator.
    fn append_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            match b {
                0x00 => self.output.extend([0x00, 0xff]),
                b => self.output.push(b),
            }
        }
        self.output.extend([0x00, 0x00]);
    }

    fn append_variant(&mut self, variant_index: u32) -> CResult<()> {
        u8::try_from(variant_index)
            .map(|index| self.output.push(index))
            .map_err(|_| Error::InvalidInput(format!("variant index {} too large", variant_index)))
    }
}

impl<'a> ser::Serializer for &'a mut Serializer {
    type Ok = ();
    type Error = Error;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = ser::Impossible<(), Error>;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, v: bool) -> CResult<()> {
        self.output.push(v as u8);
        Ok(())
    }

    fn serialize_i8(self, v: i8) -> CResult<()> {
        self.serialize_i64(v as i64)
    }

    fn serialize_i16(self, v: i16) -> CResult<()> {
        self.serialize_i64(v as i64)
    }

    fn serialize_i32(self, v: i32) -> CResult<()> {
        self.serialize_i64(v as i64)
    }

    fn serialize_i64(self, v: i64) -> CResult<()> {
        // Flip the sign bit, so negative values sort below positive ones.
        self.output.extend(((v as u64) ^ (1 << 63)).to_be_bytes());
        Ok(())
    }

    fn serialize_u8(self, v: u8) -> CResult<()> {
        self.serialize_u64(v as u64)
    }

    fn serialize_u16(self, v: u16) -> CResult<()> {
        self.serialize_u64(v as u64)
    }

    fn serialize_u32(self, v: u32) -> CResult<()> {
        self.serialize_u64(v as u64)
    }

    fn serialize_u64(self, v: u64) -> CResult<()> {
        varint::encode_u64(v, &mut self.output);
        Ok(())
    }

    fn serialize_f32(self, v: f32) -> CResult<()> {
        self.serialize_f64(v as f64)
    }

    fn serialize_f64(self, v: f64) -> CResult<()> {
        let mut bits = v.to_bits();
        if bits >> 63 & 1 == 1 {
            bits = !bits; // negative, flip all bits
        } else {
            bits ^= 1 << 63; // positive, flip the sign bit only
        }
        self.output.extend(bits.to_be_bytes());
        Ok(())
    }

    fn serialize_char(self, v: char) -> CResult<()> {
        self.serialize_u64(v as u64)
    }

    fn serialize_str(self, v: &str) -> CResult<()> {
        self.serialize_bytes(v.as_bytes())
    }

    fn serialize_bytes(self, v: &[u8]) -> CResult<()> {
        self.append_bytes(v);
        Ok(())
    }

    fn serialize_none(self) -> CResult<()> {
        self.output.push(0x00);
        Ok(())
    }

    fn serialize_some<T: ?Sized + ser::Serialize>(self, value: &T) -> CResult<()> {
        self.output.push(0x01);
        value.serialize(self)
    }

    fn serialize_unit(self) -> CResult<()> {
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> CResult<()> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
    ) -> CResult<()> {
        self.append_variant(variant_index)
    }

    fn serialize_newtype_struct<T: ?Sized + ser::Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> CResult<()> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + ser::Serialize>(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        value: &T,
    ) -> CResult<()> {
        self.append_variant(variant_index)?;
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> CResult<Self::SerializeSeq> {
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> CResult<Self::SerializeTuple> {
        Ok(self)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> CResult<Self::SerializeTupleStruct> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> CResult<Self::SerializeTupleVariant> {
        self.append_variant(variant_index)?;
        Ok(self)
    }

    fn serialize_map(self, _len: Option<usize>) -> CResult<Self::SerializeMap> {
        Err(Error::Unsupported("maps are not encodable as keys".to_string()))
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> CResult<Self::SerializeStruct> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> CResult<Self::SerializeStructVariant> {
        self.append_variant(variant_index)?;
        Ok(self)
    }
}

impl<'a> ser::SerializeSeq for &'a mut Serializer {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T: ?Sized + ser::Serialize>(&mut self, value: &T) -> CResult<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> CResult<()> {
        Ok(())
    }
}

impl<'a> ser::SerializeTuple for &'a mut Serializer {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T: ?Sized + ser::Serialize>(&mut self, value: &T) -> CResult<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> CResult<()> {
        Ok(())
    }
}

impl<'a> ser::SerializeTupleStruct for &'a mut Serializer {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + ser::Serialize>(&mut self, value: &T) -> CResult<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> CResult<()> {
        Ok(())
    }
}

impl<'a> ser::SerializeTupleVariant for &'a mut Serializer {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + ser::Serialize>(&mut self, value: &T) -> CResult<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> CResult<()> {
        Ok(())
    }
}

impl<'a> ser::SerializeStruct for &'a mut Serializer {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + ser::Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> CResult<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> CResult<()> {
        Ok(())
    }
}

impl<'a> ser::SerializeStructVariant for &'a mut Serializer {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + ser::Serialize>(
        &mut self,
        _key: &'static str,
        value: &T,
    ) -> CResult<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> CResult<()> {
        Ok(())
    }
}

struct Deserializer<'de> {
    input: &'de [u8],
}

impl<'de> Deserializer<'de> {
    fn take_bytes(&mut self, len: usize) -> CResult<&'de [u8]> {
        if self.input.len() < len {
            return Err(Error::InvalidData(format!(
                "got {} bytes of key, expected at least {}",
                self.input.len(),
                len
            )));
        }
        let (taken, rest) = self.input.split_at(len);
        self.input = rest;
        Ok(taken)
    }

    /// Takes an escaped byte string off the input, unescaping 0x00 0xff and
    /// stopping at the 0x00 0x00 terminator.
    fn take_terminated_bytes(&mut self) -> CResult<Vec<u8>> {
        let mut decoded = Vec::new();
        let mut iter = self.input.iter().enumerate();
        let taken = loop {
            match iter.next() {
                Some((_, 0x00)) => match iter.next() {
                    Some((i, 0x00)) => break i + 1,
                    Some((_, 0xff)) => decoded.push(0x00),
                    _ => {
                        return Err(Error::InvalidData(
                            "invalid escape sequence in key".to_string(),
                        ))
                    }
                },
                Some((_, &b)) => decoded.push(b),
                None => return Err(Error::InvalidData("unterminated key bytes".to_string())),
            }
        };
        self.input = &self.input[taken..];
        Ok(decoded)
    }

    fn take_i64(&mut self) -> CResult<i64> {
        let bytes = self.take_bytes(8)?;
        let n = u64::from_be_bytes(bytes.try_into().expect("took 8 bytes"));
        Ok((n ^ (1 << 63)) as i64)
    }

    fn take_u64(&mut self) -> CResult<u64> {
        varint::take_u64(&mut self.input)
    }

    fn take_f64(&mut self) -> CResult<f64> {
        let bytes = self.take_bytes(8)?;
        let mut bits = u64::from_be_bytes(bytes.try_into().expect("took 8 bytes"));
        if bits >> 63 & 1 == 1 {
            bits ^= 1 << 63;
        } else {
            bits = !bits;
        }
        Ok(f64::from_bits(bits))
    }
}

impl<'de, 'a> de::Deserializer<'de> for &'a mut Deserializer<'de> {
    type Error = Error;

    fn deserialize_any<V: de::Visitor<'de>>(self, _visitor: V) -> CResult<V::Value> {
        Err(Error::Unsupported("keys must be decoded as a known type".to_string()))
    }

    fn deserialize_bool<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        match self.take_bytes(1)?[0] {
            0x00 => visitor.visit_bool(false),
            0x01 => visitor.visit_bool(true),
            b => Err(Error::InvalidData(format!("invalid boolean byte {:#04x}", b))),
        }
    }

    fn deserialize_i8<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        let n = self.take_i64()?;
        visitor.visit_i8(
            i8::try_from(n).map_err(|_| Error::InvalidData(format!("{} out of i8 range", n)))?,
        )
    }

    fn deserialize_i16<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        let n = self.take_i64()?;
        visitor.visit_i16(
            i16::try_from(n).map_err(|_| Error::InvalidData(format!("{} out of i16 range", n)))?,
        )
    }

    fn deserialize_i32<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        let n = self.take_i64()?;
        visitor.visit_i32(
            i32::try_from(n).map_err(|_| Error::InvalidData(format!("{} out of i32 range", n)))?,
        )
    }

    fn deserialize_i64<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        visitor.visit_i64(self.take_i64()?)
    }

    fn deserialize_u8<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        let n = self.take_u64()?;
        visitor.visit_u8(
            u8::try_from(n).map_err(|_| Error::InvalidData(format!("{} out of u8 range", n)))?,
        )
    }

    fn deserialize_u16<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        let n = self.take_u64()?;
        visitor.visit_u16(
            u16::try_from(n).map_err(|_| Error::InvalidData(format!("{} out of u16 range", n)))?,
        )
    }

    fn deserialize_u32<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        let n = self.take_u64()?;
        visitor.visit_u32(
            u32::try_from(n).map_err(|_| Error::InvalidData(format!("{} out of u32 range", n)))?,
        )
    }

    fn deserialize_u64<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        visitor.visit_u64(self.take_u64()?)
    }

    fn deserialize_f32<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        visitor.visit_f32(self.take_f64()? as f32)
    }

    fn deserialize_f64<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        visitor.visit_f64(self.take_f64()?)
    }

    fn deserialize_char<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        let n = self.take_u64()?;
        let c = u32::try_from(n)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| Error::InvalidData(format!("invalid char code {}", n)))?;
        visitor.visit_char(c)
    }

    fn deserialize_str<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        visitor.visit_string(String::from_utf8(self.take_terminated_bytes()?)?)
    }

    fn deserialize_string<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        visitor.visit_byte_buf(self.take_terminated_bytes()?)
    }

    fn deserialize_byte_buf<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        match self.take_bytes(1)?[0] {
            0x00 => visitor.visit_none(),
            0x01 => visitor.visit_some(self),
            b => Err(Error::InvalidData(format!("invalid option byte {:#04x}", b))),
        }
    }

    fn deserialize_unit<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: de::Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> CResult<V::Value> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: de::Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> CResult<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: de::Visitor<'de>>(self, visitor: V) -> CResult<V::Value> {
        visitor.visit_seq(SeqDeserializer { de: self, len: None })
    }

    fn deserialize_tuple<V: de::Visitor<'de>>(self, len: usize, visitor: V) -> CResult<V::Value> {
        visitor.visit_seq(SeqDeserializer { de: self, len: Some(len) })
    }

    fn deserialize_tuple_struct<V: de::Visitor<'de>>(
        self,
        _name: &'static str,
        len: usize,
        visitor: V,
    ) -> CResult<V::Value> {
        self.deserialize_tuple(len, visitor)
    }

    fn deserialize_map<V: de::Visitor<'de>>(self, _visitor: V) -> CResult<V::Value> {
        Err(Error::Unsupported("maps are not decodable as keys".to_string()))
    }

    fn deserialize_struct<V: de::Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> CResult<V::Value> {
        self.deserialize_tuple(fields.len(), visitor)
    }

    fn deserialize_enum<V: de::Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> CResult<V::Value> {
        visitor.visit_enum(self)
    }

    fn deserialize_identifier<V: de::Visitor<'de>>(self, _visitor: V) -> CResult<V::Value> {
        Err(Error::Unsupported("keys do not carry identifiers".to_string()))
    }

    fn deserialize_ignored_any<V: de::Visitor<'de>>(self, _visitor: V) -> CResult<V::Value> {
        Err(Error::Unsupported("keys cannot skip values".to_string()))
    }
}

struct SeqDeserializer<'a, 'de> {
    de: &'a mut Deserializer<'de>,
    len: Option<usize>,
}

impl<'a, 'de> de::SeqAccess<'de> for SeqDeserializer<'a, 'de> {
    type Error = Error;

    fn next_element_seed<T: de::DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> CResult<Option<T::Value>> {
        match &mut self.len {
            Some(0) => return Ok(None),
            Some(len) => *len -= 1,
            // An unbounded sequence runs to the end of the input.
            None if self.de.input.is_empty() => return Ok(None),
            None => {}
        }
        seed.deserialize(&mut *self.de).map(Some)
    }
}

impl<'de, 'a> de::EnumAccess<'de> for &'a mut Deserializer<'de> {
    type Error = Error;
    type Variant = Self;

    fn variant_seed<V: de::DeserializeSeed<'de>>(self, seed: V) -> CResult<(V::Value, Self)> {
        let index = self.take_bytes(1)?[0] as u32;
        let value = seed.deserialize(de::value::U32Deserializer::<Error>::new(index))?;
        Ok((value, self))
    }
}

impl<'de, 'a> de::VariantAccess<'de> for &'a mut Deserializer<'de> {
    type Error = Error;

    fn unit_variant(self) -> CResult<()> {
        Ok(())
    }

    fn newtype_variant_seed<T: de::DeserializeSeed<'de>>(self, seed: T) -> CResult<T::Value> {
        seed.deserialize(self)
    }

    fn tuple_variant<V: de::Visitor<'de>>(self, len: usize, visitor: V) -> CResult<V::Value> {
        visitor.visit_seq(SeqDeserializer { de: self, len: Some(len) })
    }

    fn struct_variant<V: de::Visitor<'de>>(
        self,
        fields: &'static [&'static str],
        visitor: V,
    ) -> CResult<V::Value> {
        visitor.visit_seq(SeqDeserializer { de: self, len: Some(fields.len()) })
    }
}

#[cfg(test)]
mod test {
    use std::borrow::Cow;

    use pretty_assertions::assert_eq;
    use serde_derive::{Deserialize, Serialize};

    use super::*;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    enum Key<'a> {
        Unit,
        Int(u64),
        Pair(u64, u64),
        Blob(
            u32,
            #[serde(with = "serde_bytes")]
            #[serde(borrow)]
            Cow<'a, [u8]>,
        ),
        Name(Cow<'a, str>),
    }

    fn roundtrip<'de, T>(value: T, encoded: &'de [u8]) -> CResult<()>
    where
        T: ser::Serialize + de::Deserialize<'de> + PartialEq + std::fmt::Debug,
    {
        assert_eq!(serialize(&value)?, encoded, "encoding of {:?}", value);
        assert_eq!(deserialize::<T>(encoded)?, value);
        Ok(())
    }

    #[test]
    fn scalars() -> CResult<()> {
        roundtrip(false, &[0x00])?;
        roundtrip(true, &[0x01])?;
        roundtrip(0u64, &[0x00])?;
        roundtrip(256u64, &[0x02, 0x01, 0x00])?;
        roundtrip(0i64, &[0x80, 0, 0, 0, 0, 0, 0, 0])?;
        roundtrip(-1i64, &[0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff])?;
        roundtrip(
            i64::MIN,
            &[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        )?;
        Ok(())
    }

    #[test]
    fn floats() -> CResult<()> {
        for v in [0.0f64, -0.0, 1.5, -1.5, f64::MIN, f64::MAX, f64::INFINITY, f64::NEG_INFINITY] {
            let encoded = serialize(&v)?;
            assert_eq!(deserialize::<f64>(&encoded)?, v);
        }
        // Ordering across signs.
        let ordered = [-f64::INFINITY, -1.5, -0.5, 0.5, 1.5, f64::INFINITY];
        for pair in ordered.windows(2) {
            assert!(serialize(&pair[0])? < serialize(&pair[1])?, "{:?}", pair);
        }
        Ok(())
    }

    #[test]
    fn strings_and_bytes() -> CResult<()> {
        roundtrip("ab".to_string(), &[0x61, 0x62, 0x00, 0x00])?;
        roundtrip("".to_string(), &[0x00, 0x00])?;
        // Embedded 0x00 bytes are escaped and survive the roundtrip.
        let encoded = serialize(&Key::Blob(1, Cow::Borrowed(&[0x01, 0x00, 0x02])))?;
        assert_eq!(encoded, vec![0x03, 0x01, 0x01, 0x01, 0x00, 0xff, 0x02, 0x00, 0x00]);
        assert_eq!(
            deserialize::<Key>(&encoded)?,
            Key::Blob(1, Cow::Owned(vec![0x01, 0x00, 0x02]))
        );
        Ok(())
    }

    #[test]
    fn enums() -> CResult<()> {
        roundtrip(Key::Unit, &[0x00])?;
        roundtrip(Key::Int(7), &[0x01, 0x01, 0x07])?;
        roundtrip(Key::Pair(1, 2), &[0x02, 0x01, 0x01, 0x01, 0x02])?;
        roundtrip(Key::Name("m".into()), &[0x04, 0x6d, 0x00, 0x00])?;
        Ok(())
    }

    #[test]
    fn enum_prefix_grouping() -> CResult<()> {
        // All keys of one variant sort contiguously, ordered by their fields,
        // which is what keyspace prefix scans rely on.
        let mut keys = vec![
            serialize(&Key::Pair(2, 0))?,
            serialize(&Key::Int(1))?,
            serialize(&Key::Pair(1, 5))?,
            serialize(&Key::Unit)?,
            serialize(&Key::Pair(1, 300))?,
            serialize(&Key::Int(9000))?,
        ];
        keys.sort();
        let decoded = keys.iter().map(|k| deserialize::<Key>(k)).collect::<CResult<Vec<_>>>()?;
        assert_eq!(
            decoded,
            vec![
                Key::Unit,
                Key::Int(1),
                Key::Int(9000),
                Key::Pair(1, 5),
                Key::Pair(1, 300),
                Key::Pair(2, 0),
            ]
        );
        Ok(())
    }

    #[test]
    fn trailing_bytes() -> CResult<()> {
        let mut encoded = serialize(&7u64)?;
        encoded.push(0xaa);
        assert!(deserialize::<u64>(&encoded).is_err());
        Ok(())
    }

    #[test]
    fn tuples() -> CResult<()> {
        let encoded = serialize(&(3u64, "a".to_string()))?;
        assert_eq!(deserialize::<(u64, String)>(&encoded)?, (3, "a".to_string()));
        Ok(())
    }
}
