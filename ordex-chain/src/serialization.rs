//! Consensus-critical serialization.
//!
//! `ChainSerialize` and `ChainDeserialize` are analogs of the Serde
//! `Serialize` and `Deserialize` traits, but for the Bitcoin wire encoding
//! that transaction bytes arrive in (little-endian integers, `CompactInt`
//! length prefixes).

mod deserialize;
mod error;

pub mod sha256d;

pub use deserialize::{ChainDeserialize, ChainDeserializeInto};
pub use error::SerializationError;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::compactint::CompactInt;

pub trait ChainSerialize {
    fn chain_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error>;

    fn chain_serialize_to_vec(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut data = Vec::new();
        self.chain_serialize(&mut data)?;
        Ok(data)
    }
}

impl ChainSerialize for u16 {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u16::<LittleEndian>(*self)
    }
}

impl ChainSerialize for u32 {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u32::<LittleEndian>(*self)
    }
}

impl ChainSerialize for u64 {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u64::<LittleEndian>(*self)
    }
}

impl ChainSerialize for i32 {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_i32::<LittleEndian>(*self)
    }
}

impl ChainSerialize for i64 {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_i64::<LittleEndian>(*self)
    }
}

impl ChainSerialize for [u8; 32] {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

impl ChainSerialize for Vec<u8> {
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        CompactInt::from(self.len()).chain_serialize(&mut target)?;
        target.write_all(self)?;
        Ok(())
    }
}

impl<T> ChainSerialize for Vec<T>
where
    T: ChainSerialize,
{
    fn chain_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        CompactInt::from(self.len()).chain_serialize(&mut target)?;
        for item in self.iter() {
            item.chain_serialize(&mut target)?
        }
        Ok(())
    }
}
