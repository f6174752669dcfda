//! The double-SHA256 digest Bitcoin uses for transaction and block ids.

use std::io;

use sha2::{Digest, Sha256};

/// Hash `data` with SHA-256 twice.
pub fn digest(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(&first);
    let mut output = [0u8; 32];
    output.copy_from_slice(&second);
    output
}

/// A `Write`r that accumulates a sha256d digest, so wire serialization can
/// be hashed without an intermediate buffer.
#[derive(Default)]
pub struct Writer {
    hash: Sha256,
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hash.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Writer {
    /// Consume the writer and produce the double hash.
    pub fn finish(self) -> [u8; 32] {
        let first = self.hash.finalize();
        let second = Sha256::digest(&first);
        let mut output = [0u8; 32];
        output.copy_from_slice(&second);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_matches_digest() {
        ordex_test::init();

        let data = b"ordex sha256d";
        let mut writer = Writer::default();
        use std::io::Write;
        writer.write_all(&data[..]).unwrap();

        assert_eq!(writer.finish(), digest(&data[..]));
    }
}
