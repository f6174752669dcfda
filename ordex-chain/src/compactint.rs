use byteorder::{LittleEndian, WriteBytesExt};

use crate::{ChainDeserialize, ChainSerialize, SerializationError};

/// The Bitcoin variable-length integer used to prefix collections on the
/// wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactInt(u64);

impl CompactInt {
    pub fn from(value: usize) -> CompactInt {
        CompactInt(value as u64)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// The encoded size (in bytes) of the given value.
    pub fn size(value: usize) -> usize {
        if value < 253 {
            1
        } else if value <= std::u16::MAX as usize {
            3
        } else if value <= std::u32::MAX as usize {
            5
        } else {
            9
        }
    }
}

impl ChainSerialize for CompactInt {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        if self.value() < 253 {
            target.write_all(&[self.value() as u8])
        } else if self.value() <= std::u16::MAX as u64 {
            target.write_all(&[253])?;
            target.write_u16::<LittleEndian>(self.value() as u16)
        } else if self.value() <= std::u32::MAX as u64 {
            target.write_all(&[254])?;
            target.write_u32::<LittleEndian>(self.value() as u32)
        } else {
            target.write_all(&[255])?;
            target.write_u64::<LittleEndian>(self.value())
        }
    }
}

impl ChainDeserialize for CompactInt {
    fn chain_deserialize<R: std::io::Read>(
        mut target: R,
    ) -> Result<CompactInt, SerializationError> {
        let first = u8::chain_deserialize(&mut target)?;
        match first {
            253 => Ok(CompactInt(u16::chain_deserialize(&mut target)? as u64)),
            254 => Ok(CompactInt(u32::chain_deserialize(&mut target)? as u64)),
            255 => Ok(CompactInt(u64::chain_deserialize(&mut target)?)),
            small => Ok(CompactInt(small as u64)),
        }
    }
}
