use std::io;

use byteorder::{LittleEndian, ReadBytesExt};

use super::SerializationError;
use crate::compactint::CompactInt;

type Result<R> = std::result::Result<R, SerializationError>;

pub trait ChainDeserialize {
    fn chain_deserialize<R: io::Read>(reader: R) -> Result<Self>
    where
        Self: Sized;
}

/// Helper for deserializing more succinctly via type inference
pub trait ChainDeserializeInto {
    /// Deserialize based on type inference
    fn chain_deserialize_into<T>(self) -> Result<T>
    where
        T: ChainDeserialize;
}

impl<R: io::Read> ChainDeserializeInto for R {
    fn chain_deserialize_into<T>(self) -> Result<T>
    where
        T: ChainDeserialize,
    {
        T::chain_deserialize(self)
    }
}

impl ChainDeserialize for u8 {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<u8> {
        Ok(reader.read_u8()?)
    }
}

impl ChainDeserialize for u16 {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<u16> {
        Ok(reader.read_u16::<LittleEndian>()?)
    }
}

impl ChainDeserialize for u32 {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<u32> {
        Ok(reader.read_u32::<LittleEndian>()?)
    }
}

impl ChainDeserialize for u64 {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<u64> {
        Ok(reader.read_u64::<LittleEndian>()?)
    }
}

impl ChainDeserialize for i32 {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<i32> {
        Ok(reader.read_i32::<LittleEndian>()?)
    }
}

impl ChainDeserialize for i64 {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<i64> {
        Ok(reader.read_i64::<LittleEndian>()?)
    }
}

impl<T> ChainDeserialize for Vec<T>
where
    T: ChainDeserialize,
{
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<Vec<T>> {
        let len = CompactInt::chain_deserialize(&mut reader)?.value() as usize;
        // Limit preallocation since blind preallocation is a DOS vulnerability
        let blind_alloc_limit = 1024;
        let mut result: Vec<T> = Vec::with_capacity(std::cmp::min(len, blind_alloc_limit));
        for _ in 0..len {
            result.push(T::chain_deserialize(&mut reader)?);
        }
        Ok(result)
    }
}

impl ChainDeserialize for [u8; 32] {
    fn chain_deserialize<R: io::Read>(mut reader: R) -> Result<[u8; 32]> {
        let mut result = [0u8; 32];
        reader.read_exact(&mut result)?;
        Ok(result)
    }
}
