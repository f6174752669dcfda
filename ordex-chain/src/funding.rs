//! Deterministic funding-key derivation.
//!
//! Every token owns a funding address derived from its identity: the
//! SHA-256 of the tick-id picks a non-hardened child path under a
//! configured master public key, and validation work is paid for by
//! satoshis sent to the HASH160 of the derived key. The master key is
//! configuration, never compiled in; derivation is a pure function of
//! `(master, tick-id)`.

use std::str::FromStr;

use hmac::{Hmac, Mac, NewMac};
use lazy_static::lazy_static;
use secp256k1::{PublicKey, Secp256k1, VerifyOnly};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

use crate::PKHash;

lazy_static! {
    static ref SECP: Secp256k1<VerifyOnly> = Secp256k1::verification_only();
}

/// Funding paths hang off this purpose-like first index.
pub const FUND_PATH_ROOT: u32 = 21;

#[derive(Error, Debug)]
pub enum FundingError {
    /// The extended key string did not decode.
    #[error("extended public key decoding error")]
    BadKey,
    /// Hardened derivation requires the private key.
    #[error("hardened child index {0} cannot be derived from a public key")]
    Hardened(u32),
    /// The HMAC output was not a usable tweak for this curve point.
    #[error("invalid derivation tweak: {0}")]
    Tweak(#[from] secp256k1::Error),
}

/// A BIP32 extended public key, reduced to the two fields child
/// derivation needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedPubKey {
    pub chain_code: [u8; 32],
    pub public_key: PublicKey,
}

impl FromStr for ExtendedPubKey {
    type Err = FundingError;

    /// Parses the standard base58check `xpub…` serialization:
    /// version(4) ‖ depth(1) ‖ fingerprint(4) ‖ child(4) ‖
    /// chain code(32) ‖ compressed key(33).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|_| FundingError::BadKey)?;
        if bytes.len() != 78 {
            return Err(FundingError::BadKey);
        }

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&bytes[13..45]);
        let public_key =
            PublicKey::from_slice(&bytes[45..78]).map_err(|_| FundingError::BadKey)?;

        Ok(ExtendedPubKey {
            chain_code,
            public_key,
        })
    }
}

impl ExtendedPubKey {
    /// CKDpub: derive the non-hardened child at `index`.
    pub fn derive_child(&self, index: u32) -> Result<ExtendedPubKey, FundingError> {
        if index >= 0x8000_0000 {
            return Err(FundingError::Hardened(index));
        }

        let mut mac = Hmac::<Sha512>::new_varkey(&self.chain_code)
            .expect("HMAC accepts a 32-byte key");
        mac.update(&self.public_key.serialize());
        mac.update(&index.to_be_bytes());
        let output = mac.finalize().into_bytes();

        let mut child_key = self.public_key;
        child_key.add_exp_assign(&SECP, &output[..32])?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&output[32..]);

        Ok(ExtendedPubKey {
            chain_code,
            public_key: child_key,
        })
    }

    pub fn derive_path(&self, path: &[u32]) -> Result<ExtendedPubKey, FundingError> {
        let mut key = self.clone();
        for &index in path {
            key = key.derive_child(index)?;
        }
        Ok(key)
    }
}

/// The funding identity derived for one token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FundDerivation {
    /// The derivation path, in `21/h1/h2` string form as persisted on the
    /// token document.
    pub path: String,
    /// HASH160 of the derived compressed public key.
    pub pkhash: PKHash,
}

/// Derives the funding path and pkhash for `tick_id`.
///
/// H = SHA-256(tick-id); the path is
/// `21 / (be_u32(H[0..4]) >> 1) / (be_u32(H[24..28]) >> 1)`, each half
/// shifted down a bit so the index stays non-hardened.
pub fn fund_derivation(
    master: &ExtendedPubKey,
    tick_id: &str,
) -> Result<FundDerivation, FundingError> {
    let hash = Sha256::digest(tick_id.as_bytes());
    let h1 = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]) >> 1;
    let h2 = u32::from_be_bytes([hash[24], hash[25], hash[26], hash[27]]) >> 1;

    let child = master.derive_path(&[FUND_PATH_ROOT, h1, h2])?;

    Ok(FundDerivation {
        path: format!("{}/{}/{}", FUND_PATH_ROOT, h1, h2),
        pkhash: PKHash::hash160(&child.public_key.serialize()),
    })
}

#[cfg(test)]
pub(crate) fn tests_master() -> ExtendedPubKey {
    let secp = Secp256k1::new();
    let secret =
        secp256k1::SecretKey::from_slice(&[0x42; 32]).expect("constant secret key is valid");
    ExtendedPubKey {
        chain_code: [7u8; 32],
        public_key: PublicKey::from_secret_key(&secp, &secret),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xpub_string_roundtrip() {
        ordex_test::init();

        let master = tests_master();
        let mut payload = Vec::with_capacity(78);
        payload.extend_from_slice(&[0x04, 0x88, 0xb2, 0x1e]);
        payload.extend_from_slice(&[0u8; 9]);
        payload.extend_from_slice(&master.chain_code);
        payload.extend_from_slice(&master.public_key.serialize());
        let encoded = bs58::encode(payload).with_check().into_string();

        let parsed: ExtendedPubKey = encoded.parse().unwrap();
        assert_eq!(parsed, master);
    }

    #[test]
    fn child_derivation_is_deterministic() {
        ordex_test::init();

        let master = tests_master();
        let once = master.derive_child(21).unwrap();
        let again = master.derive_child(21).unwrap();

        assert_eq!(once, again);
        assert_ne!(once.public_key, master.public_key);
        assert_ne!(once.chain_code, master.chain_code);
    }

    #[test]
    fn hardened_index_is_rejected() {
        ordex_test::init();

        assert!(matches!(
            tests_master().derive_child(0x8000_0000),
            Err(FundingError::Hardened(_))
        ));
    }

    #[test]
    fn derivation_is_deterministic_and_tick_sensitive() {
        ordex_test::init();

        let master = tests_master();
        let a = fund_derivation(&master, "FOO").unwrap();
        let b = fund_derivation(&master, "FOO").unwrap();
        let c = fund_derivation(&master, "BAR").unwrap();

        assert_eq!(a, b);
        assert_ne!(a.pkhash, c.pkhash);
        assert!(a.path.starts_with("21/"));
    }

    #[test]
    fn path_indices_follow_identity_hash() {
        ordex_test::init();

        let master = tests_master();
        let derivation = fund_derivation(&master, "FOO").unwrap();

        let hash = Sha256::digest(b"FOO");
        let h1 = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]) >> 1;
        let h2 = u32::from_be_bytes([hash[24], hash[25], hash[26], hash[27]]) >> 1;
        assert_eq!(derivation.path, format!("21/{}/{}", h1, h2));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        ordex_test::init();

        assert!("not-an-xpub".parse::<ExtendedPubKey>().is_err());
        // valid base58check, wrong payload length
        assert!("1BitcoinEaterAddressDontSendf59kuE"
            .parse::<ExtendedPubKey>()
            .is_err());
    }
}
