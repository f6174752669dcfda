//! Inscription envelope extraction.
//!
//! An inscription envelope is a provably-unspendable branch of the form
//! `OP_FALSE OP_IF "ord" <fields> OP_0 <content> OP_ENDIF` embedded in a
//! locking script. Fields are tag-value pairs; integer tags carry typed
//! metadata and arbitrary pushes become string-keyed fields. Malformed
//! envelopes are skipped, never an error: an output that does not decode
//! simply carries no inscription.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::script::{self, opcodes, read_op};
use crate::{Outpoint, PKHash, Script};

/// The protocol tag that opens an inscription envelope.
const PROTOCOL: &[u8] = b"ord";

const TAG_CONTENT_TYPE: u8 = 1;
const TAG_POINTER: u8 = 2;
const TAG_PARENT: u8 = 3;
const TAG_METADATA: u8 = 5;
const TAG_METAPROTO: u8 = 7;
const TAG_CONTENT_ENCODING: u8 = 9;

/// The content carried by an envelope, plus its digest and size.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct File {
    /// SHA-256 of the content body.
    pub hash: [u8; 32],
    /// Content size in bytes.
    pub size: u32,
    /// The declared content type (tag 1), possibly empty.
    pub content_type: String,
    /// The raw content body.
    pub content: Vec<u8>,
}

/// A decoded inscription envelope.
#[derive(Clone, Debug, Default)]
pub struct Inscription {
    pub file: File,
    /// Tag 2: little-endian sat pointer.
    pub pointer: Option<u64>,
    /// Tag 3: parent inscription outpoint.
    pub parent: Option<Outpoint>,
    /// Tag 5: CBOR metadata.
    pub metadata: Option<ciborium::value::Value>,
    /// Tag 7: metaprotocol bytes.
    pub metaproto: Option<Vec<u8>>,
    /// Tag 9: content encoding.
    pub content_encoding: Option<String>,
    /// String-keyed fields from non-integer tags.
    pub fields: BTreeMap<String, Vec<u8>>,
    /// Owner pkhash from a P2PKH suffix following the envelope.
    pub owner: Option<PKHash>,
}

/// Extracts the first inscription envelope from `script`, if any.
pub fn parse(script: &Script) -> Option<Inscription> {
    let bytes = script.as_bytes();
    let mut idx = 0;
    let mut prev_empty_push = false;

    while idx < bytes.len() {
        let op = read_op(bytes, &mut idx).ok()?;
        if op.code == opcodes::OP_IF && prev_empty_push {
            let mut cursor = idx;
            if let Ok(protocol) = read_op(bytes, &mut cursor) {
                if protocol.is_push() && protocol.data == PROTOCOL {
                    return parse_body(bytes, cursor);
                }
            }
        }
        prev_empty_push = op.code == opcodes::OP_0 && op.data.is_empty();
    }

    None
}

fn parse_body(bytes: &[u8], mut idx: usize) -> Option<Inscription> {
    let mut inscription = Inscription::default();
    let mut content = Vec::new();

    loop {
        let tag_op = read_op(bytes, &mut idx).ok()?;
        if tag_op.code == opcodes::OP_ENDIF {
            break;
        }
        if !tag_op.is_push() {
            return None;
        }

        if tag_op.small_int() == Some(0) {
            // Tag 0 begins the content body, which may span multiple
            // pushes; the envelope terminates at OP_ENDIF.
            loop {
                let op = read_op(bytes, &mut idx).ok()?;
                if op.code == opcodes::OP_ENDIF {
                    break;
                }
                if !op.is_push() {
                    return None;
                }
                content.extend_from_slice(&op.data);
            }
            break;
        }

        let value = read_op(bytes, &mut idx).ok()?;
        if !value.is_push() {
            return None;
        }

        match tag_op.small_int() {
            Some(TAG_CONTENT_TYPE) => {
                inscription.file.content_type =
                    String::from_utf8_lossy(&value.data).into_owned();
            }
            Some(TAG_POINTER) => {
                inscription.pointer = parse_le_u64(&value.data);
            }
            Some(TAG_PARENT) => {
                inscription.parent = parse_parent(&value.data);
            }
            Some(TAG_METADATA) => {
                inscription.metadata = ciborium::de::from_reader(&value.data[..]).ok();
            }
            Some(TAG_METAPROTO) => {
                inscription.metaproto = Some(value.data);
            }
            Some(TAG_CONTENT_ENCODING) => {
                inscription.content_encoding =
                    Some(String::from_utf8_lossy(&value.data).into_owned());
            }
            Some(_) => {}
            None => {
                inscription
                    .fields
                    .insert(String::from_utf8_lossy(&tag_op.data).into_owned(), value.data);
            }
        }
    }

    inscription.file.size = content.len() as u32;
    let digest = Sha256::digest(&content);
    inscription.file.hash.copy_from_slice(&digest);
    inscription.file.content = content;

    // After the envelope closes, a P2PKH template (optionally behind an
    // OP_CODESEPARATOR) names the owner.
    let rest = &bytes[idx..];
    inscription.owner = script::p2pkh_owner(rest).or_else(|| {
        if rest.first() == Some(&opcodes::OP_CODESEPARATOR) {
            script::p2pkh_owner(&rest[1..])
        } else {
            None
        }
    });

    Some(inscription)
}

/// Little-endian integer fields are minimally encoded and at most 8 bytes.
fn parse_le_u64(data: &[u8]) -> Option<u64> {
    if data.len() > 8 {
        return None;
    }
    let mut buf = [0u8; 8];
    buf[..data.len()].copy_from_slice(data);
    Some(u64::from_le_bytes(buf))
}

/// A parent field is a 32-byte txid followed by a little-endian output
/// index with trailing zero bytes trimmed.
fn parse_parent(data: &[u8]) -> Option<Outpoint> {
    if data.len() < 32 || data.len() > 36 {
        return None;
    }
    let mut txid = [0u8; 32];
    txid.copy_from_slice(&data[..32]);
    let mut vout_bytes = [0u8; 4];
    vout_bytes[..data.len() - 32].copy_from_slice(&data[32..]);
    Some(Outpoint::new(
        crate::transaction::Hash(txid),
        u32::from_le_bytes(vout_bytes),
    ))
}

/// Test/fixture helper: wraps `content` in a minimal envelope, optionally
/// with a P2PKH owner suffix.
pub fn build(content_type: &str, content: &[u8], owner: Option<&PKHash>) -> Script {
    let mut bytes = vec![opcodes::OP_0, opcodes::OP_IF];
    script::push_data(&mut bytes, PROTOCOL);
    script::push_data(&mut bytes, &[TAG_CONTENT_TYPE]);
    script::push_data(&mut bytes, content_type.as_bytes());
    bytes.push(opcodes::OP_0);
    script::push_data(&mut bytes, content);
    bytes.push(opcodes::OP_ENDIF);
    if let Some(owner) = owner {
        bytes.push(opcodes::OP_DUP);
        bytes.push(opcodes::OP_HASH160);
        bytes.push(0x14);
        bytes.extend_from_slice(&owner.0);
        bytes.push(opcodes::OP_EQUALVERIFY);
        bytes.push(opcodes::OP_CHECKSIG);
    }
    Script(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_identity() {
        ordex_test::init();

        let body = b"{\"p\":\"bsv-20\"}".to_vec();
        let script = build("application/bsv-20", &body, None);
        let inscription = parse(&script).expect("envelope should decode");

        assert_eq!(inscription.file.content, body);
        assert_eq!(inscription.file.size as usize, body.len());
        assert_eq!(inscription.file.content_type, "application/bsv-20");
        let expected: [u8; 32] = Sha256::digest(&body).into();
        assert_eq!(inscription.file.hash, expected);
    }

    #[test]
    fn owner_suffix() {
        ordex_test::init();

        let owner = PKHash([0x42; 20]);
        let script = build("text/plain", b"hi", Some(&owner));

        assert_eq!(parse(&script).unwrap().owner, Some(owner));
    }

    #[test]
    fn owner_behind_codeseparator() {
        ordex_test::init();

        let owner = PKHash([0x42; 20]);
        let bare = build("text/plain", b"hi", None);
        let with_owner = build("text/plain", b"hi", Some(&owner));
        let p2pkh_suffix = &with_owner.0[with_owner.0.len() - 25..];

        let mut bytes = bare.0;
        bytes.push(opcodes::OP_CODESEPARATOR);
        bytes.extend_from_slice(p2pkh_suffix);

        assert_eq!(parse(&Script(bytes)).unwrap().owner, Some(owner));
    }

    #[test]
    fn multi_push_content_concatenates() {
        ordex_test::init();

        let mut bytes = vec![opcodes::OP_0, opcodes::OP_IF];
        script::push_data(&mut bytes, b"ord");
        bytes.push(opcodes::OP_0);
        script::push_data(&mut bytes, b"hello ");
        script::push_data(&mut bytes, b"world");
        bytes.push(opcodes::OP_ENDIF);

        let inscription = parse(&Script(bytes)).unwrap();
        assert_eq!(inscription.file.content, b"hello world".to_vec());
    }

    #[test]
    fn p2pkh_prefix_before_envelope() {
        ordex_test::init();

        let owner = PKHash([0x17; 20]);
        let envelope = build("text/plain", b"prefixed", None);
        let mut bytes = Vec::new();
        bytes.push(opcodes::OP_DUP);
        bytes.push(opcodes::OP_HASH160);
        bytes.push(0x14);
        bytes.extend_from_slice(&owner.0);
        bytes.push(opcodes::OP_EQUALVERIFY);
        bytes.push(opcodes::OP_CHECKSIG);
        bytes.extend_from_slice(&envelope.0);

        let inscription = parse(&Script(bytes)).expect("envelope after p2pkh prefix");
        assert_eq!(inscription.file.content, b"prefixed".to_vec());
    }

    #[test]
    fn wrong_protocol_is_not_an_envelope() {
        ordex_test::init();

        let mut bytes = vec![opcodes::OP_0, opcodes::OP_IF];
        script::push_data(&mut bytes, b"nope");
        bytes.push(opcodes::OP_0);
        script::push_data(&mut bytes, b"body");
        bytes.push(opcodes::OP_ENDIF);

        assert!(parse(&Script(bytes)).is_none());
    }

    #[test]
    fn integer_fields_decode() {
        ordex_test::init();

        let parent_txid = [0x33u8; 32];
        let mut bytes = vec![opcodes::OP_0, opcodes::OP_IF];
        script::push_data(&mut bytes, b"ord");
        script::push_data(&mut bytes, &[TAG_POINTER]);
        script::push_data(&mut bytes, &[0x01, 0x02]);
        script::push_data(&mut bytes, &[TAG_PARENT]);
        let mut parent = parent_txid.to_vec();
        parent.push(3);
        script::push_data(&mut bytes, &parent);
        script::push_data(&mut bytes, b"app");
        script::push_data(&mut bytes, b"myapp");
        bytes.push(opcodes::OP_0);
        bytes.push(opcodes::OP_ENDIF);

        let inscription = parse(&Script(bytes)).unwrap();
        assert_eq!(inscription.pointer, Some(0x0201));
        assert_eq!(
            inscription.parent,
            Some(Outpoint::new(crate::transaction::Hash(parent_txid), 3))
        );
        assert_eq!(inscription.fields.get("app"), Some(&b"myapp".to_vec()));
        assert_eq!(inscription.file.size, 0);
    }

    proptest::proptest! {
        /// Appending arbitrary bytes after a valid envelope leaves the
        /// extraction unchanged.
        #[test]
        fn trailing_bytes_do_not_disturb_extraction(
            body in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..512),
            trailer in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..64),
        ) {
            ordex_test::init();

            let script = build("application/bsv-20", &body, None);
            let baseline = parse(&script).unwrap();

            let mut extended = script.0.clone();
            extended.extend_from_slice(&trailer);
            let reparsed = parse(&Script(extended)).unwrap();

            proptest::prop_assert_eq!(baseline.file, reparsed.file);
        }
    }
}
