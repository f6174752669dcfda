//! Locking-script decoding.
//!
//! Scripts are decoded into `(opcode, data)` operations using the standard
//! UTXO push encodings; everything the envelope and bitcom parsers do is
//! built on `read_op`.

use std::{
    fmt,
    io::{self, Read},
};

use serde::Deserialize;

use crate::serialization::{ChainDeserialize, ChainSerialize, SerializationError};
use crate::{CompactInt, PKHash};

/// Script opcodes the decoders care about.
pub mod opcodes {
    pub const OP_0: u8 = 0x00;
    pub const OP_PUSHDATA1: u8 = 0x4c;
    pub const OP_PUSHDATA2: u8 = 0x4d;
    pub const OP_PUSHDATA4: u8 = 0x4e;
    pub const OP_1: u8 = 0x51;
    pub const OP_16: u8 = 0x60;
    pub const OP_IF: u8 = 0x63;
    pub const OP_ENDIF: u8 = 0x68;
    pub const OP_RETURN: u8 = 0x6a;
    pub const OP_DUP: u8 = 0x76;
    pub const OP_EQUALVERIFY: u8 = 0x88;
    pub const OP_HASH160: u8 = 0xa9;
    pub const OP_CHECKSIG: u8 = 0xac;
    pub const OP_CODESEPARATOR: u8 = 0xab;
}

/// An encoding of a locking script.
#[derive(Clone, Eq, PartialEq, Hash, Default)]
pub struct Script(pub Vec<u8>);

/// A single decoded script operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Op {
    /// The raw opcode byte.
    pub code: u8,
    /// Pushed data; empty for non-push opcodes.
    pub data: Vec<u8>,
}

impl Op {
    /// Interpret this operation as a small integer, covering both the
    /// `OP_0`/`OP_1..OP_16` opcodes and minimal single-byte pushes.
    pub fn small_int(&self) -> Option<u8> {
        match self.code {
            opcodes::OP_0 if self.data.is_empty() => Some(0),
            code if (opcodes::OP_1..=opcodes::OP_16).contains(&code) => {
                Some(code - opcodes::OP_1 + 1)
            }
            _ if self.data.len() == 1 && self.data[0] <= 16 => Some(self.data[0]),
            _ => None,
        }
    }

    /// Returns `true` if this operation pushed data onto the stack.
    pub fn is_push(&self) -> bool {
        self.code <= opcodes::OP_PUSHDATA4
    }
}

/// Reads the operation starting at `idx`, advancing `idx` past it.
///
/// Truncated pushes are parse errors; unknown opcodes are returned as
/// data-less operations so callers can skip what they don't recognize.
pub fn read_op(script: &[u8], idx: &mut usize) -> Result<Op, SerializationError> {
    let code = *script
        .get(*idx)
        .ok_or(SerializationError::Parse("script truncated"))?;
    *idx += 1;

    let len = match code {
        push if push <= 0x4b => push as usize,
        opcodes::OP_PUSHDATA1 => {
            let len = *script
                .get(*idx)
                .ok_or(SerializationError::Parse("pushdata1 truncated"))? as usize;
            *idx += 1;
            len
        }
        opcodes::OP_PUSHDATA2 => {
            let bytes = script
                .get(*idx..*idx + 2)
                .ok_or(SerializationError::Parse("pushdata2 truncated"))?;
            *idx += 2;
            u16::from_le_bytes([bytes[0], bytes[1]]) as usize
        }
        opcodes::OP_PUSHDATA4 => {
            let bytes = script
                .get(*idx..*idx + 4)
                .ok_or(SerializationError::Parse("pushdata4 truncated"))?;
            *idx += 4;
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
        }
        _ => return Ok(Op { code, data: Vec::new() }),
    };

    let data = script
        .get(*idx..*idx + len)
        .ok_or(SerializationError::Parse("push data truncated"))?
        .to_vec();
    *idx += len;
    Ok(Op { code, data })
}

/// Extracts the owner pkhash from a 25-byte P2PKH template
/// (`DUP HASH160 <20 bytes> EQUALVERIFY CHECKSIG`) at the start of `bytes`.
pub fn p2pkh_owner(bytes: &[u8]) -> Option<PKHash> {
    if bytes.len() < 25 {
        return None;
    }
    if bytes[0] == opcodes::OP_DUP
        && bytes[1] == opcodes::OP_HASH160
        && bytes[2] == 0x14
        && bytes[23] == opcodes::OP_EQUALVERIFY
        && bytes[24] == opcodes::OP_CHECKSIG
    {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes[3..23]);
        Some(PKHash(hash))
    } else {
        None
    }
}

impl Script {
    /// The owner pkhash when this script is exactly the P2PKH template.
    pub fn p2pkh(&self) -> Option<PKHash> {
        if self.0.len() == 25 {
            p2pkh_owner(&self.0)
        } else {
            None
        }
    }

    /// Byte-substring search, used for market-lock spend detection.
    pub fn contains(&self, needle: &[u8]) -> bool {
        !needle.is_empty() && self.0.windows(needle.len()).any(|window| window == needle)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn serialized_size(&self) -> usize {
        CompactInt::size(self.0.len()) + self.0.len()
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Script")
            .field(&hex::encode(&self.0))
            .finish()
    }
}

impl ChainSerialize for Script {
    fn chain_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        CompactInt::from(self.0.len()).chain_serialize(&mut writer)?;
        writer.write_all(&self.0[..])?;
        Ok(())
    }
}

impl ChainDeserialize for Script {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let len = CompactInt::chain_deserialize(&mut reader)?.value();
        let mut bytes = Vec::new();
        reader.take(len).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != len {
            return Err(SerializationError::Parse("script truncated"));
        }
        Ok(Script(bytes))
    }
}

/// Persisted records carry scripts in hex form.
impl serde::Serialize for Script {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> serde::Deserialize<'de> for Script {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let string = String::deserialize(deserializer)?;
        hex::decode(&string)
            .map(Script)
            .map_err(serde::de::Error::custom)
    }
}

/// Builds a minimal push operation for `data`.
///
/// Only used by tests and by envelope construction in fixtures, but it
/// lives here so the encoding stays next to the decoder.
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        len if len <= 0x4b => script.push(len as u8),
        len if len <= 0xff => {
            script.push(opcodes::OP_PUSHDATA1);
            script.push(len as u8);
        }
        len if len <= 0xffff => {
            script.push(opcodes::OP_PUSHDATA2);
            script.extend_from_slice(&(len as u16).to_le_bytes());
        }
        len => {
            script.push(opcodes::OP_PUSHDATA4);
            script.extend_from_slice(&(len as u32).to_le_bytes());
        }
    }
    script.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_each_push_encoding() {
        ordex_test::init();

        let mut script = Vec::new();
        push_data(&mut script, b"abc");
        push_data(&mut script, &vec![7u8; 0x60]);
        push_data(&mut script, &vec![9u8; 0x200]);
        script.push(opcodes::OP_RETURN);

        let mut idx = 0;
        assert_eq!(read_op(&script, &mut idx).unwrap().data, b"abc".to_vec());
        assert_eq!(read_op(&script, &mut idx).unwrap().data, vec![7u8; 0x60]);
        assert_eq!(read_op(&script, &mut idx).unwrap().data, vec![9u8; 0x200]);
        let op = read_op(&script, &mut idx).unwrap();
        assert_eq!(op.code, opcodes::OP_RETURN);
        assert!(op.data.is_empty());
        assert_eq!(idx, script.len());
    }

    #[test]
    fn truncated_push_is_parse_error() {
        ordex_test::init();

        let script = [0x4b, 0x01, 0x02];
        let mut idx = 0;

        assert!(read_op(&script, &mut idx).is_err());
    }

    #[test]
    fn small_ints() {
        ordex_test::init();

        let script = [opcodes::OP_0, opcodes::OP_1, opcodes::OP_16, 0x01, 0x05];
        let mut idx = 0;

        assert_eq!(read_op(&script, &mut idx).unwrap().small_int(), Some(0));
        assert_eq!(read_op(&script, &mut idx).unwrap().small_int(), Some(1));
        assert_eq!(read_op(&script, &mut idx).unwrap().small_int(), Some(16));
        assert_eq!(read_op(&script, &mut idx).unwrap().small_int(), Some(5));
    }

    #[test]
    fn p2pkh_template() {
        ordex_test::init();

        let mut bytes = vec![opcodes::OP_DUP, opcodes::OP_HASH160, 0x14];
        bytes.extend_from_slice(&[0xab; 20]);
        bytes.push(opcodes::OP_EQUALVERIFY);
        bytes.push(opcodes::OP_CHECKSIG);

        let script = Script(bytes);
        assert_eq!(script.p2pkh(), Some(PKHash([0xab; 20])));
        assert_eq!(Script(vec![opcodes::OP_RETURN]).p2pkh(), None);
    }
}
