//! Bitcom segment parsing.
//!
//! After an `OP_RETURN` (and after each `|` separator that follows one), a
//! sub-payload opens with a protocol prefix: `MAP` key-value attributes,
//! `B` files, or `SIGMA` input signatures. Parsing is tolerant: a segment
//! that does not decode is skipped and never fails the containing
//! transaction.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::script::{opcodes, read_op, Op};
use crate::Transaction;

/// Bitcom address of the Magic Attribute Protocol.
pub const MAP_PREFIX: &str = "1PuQa7K62MiKCtssSLKy1kh56WWU7MtUR5";
/// Bitcom address of the B file protocol.
pub const B_PREFIX: &str = "19HxigV4QyBv3tHpQVcUEQyq1pzZVdoAut";
/// Protocol prefix of sigma signatures.
pub const SIGMA_PREFIX: &str = "SIGMA";

const SEPARATOR: u8 = b'|';

const MAP_MAX_KEY_LEN: usize = 256;
const MAP_MAX_VALUE_LEN: usize = 1024;

/// One decoded bitcom segment.
#[derive(Clone, Debug, PartialEq)]
pub enum Bitcom {
    Map(BTreeMap<String, serde_json::Value>),
    B(BFile),
    Sigma(Sigma),
}

/// A `B` protocol file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BFile {
    pub content: Vec<u8>,
    pub content_type: String,
    pub encoding: String,
    pub name: String,
    pub hash: [u8; 32],
    pub size: u32,
}

/// A `SIGMA` signature segment.
///
/// The message digest covers the sha256 of the signing input's outpoint
/// concatenated with the sha256 of the output script up to the segment;
/// verifying the signature against it is the provenance layer's concern,
/// not the indexer's.
#[derive(Clone, Debug, PartialEq)]
pub struct Sigma {
    pub algorithm: String,
    pub address: String,
    pub signature: Vec<u8>,
    pub vin: u32,
    pub message: [u8; 32],
}

fn is_boundary(op: &Op) -> bool {
    op.code == opcodes::OP_RETURN || (op.code == 1 && op.data == [SEPARATOR])
}

/// Parses every bitcom segment of output `vout`.
pub fn parse(tx: &Transaction, vout: usize) -> Vec<Bitcom> {
    let script = match tx.outputs.get(vout) {
        Some(output) => output.lock_script.as_bytes(),
        None => return Vec::new(),
    };

    // Find the OP_RETURN that opens the bitcom region.
    let mut idx = 0;
    loop {
        match read_op(script, &mut idx) {
            Ok(op) if op.code == opcodes::OP_RETURN => break,
            Ok(_) => continue,
            Err(_) => return Vec::new(),
        }
    }

    let mut segments = Vec::new();
    loop {
        let start_idx = idx;
        let protocol = match read_op(script, &mut idx) {
            Ok(op) => op,
            Err(_) => break,
        };

        let segment = match protocol.data.as_slice() {
            prefix if prefix == MAP_PREFIX.as_bytes() => {
                parse_map(script, &mut idx).map(Bitcom::Map)
            }
            prefix if prefix == B_PREFIX.as_bytes() => {
                Some(Bitcom::B(parse_b(script, &mut idx)))
            }
            prefix if prefix == SIGMA_PREFIX.as_bytes() => {
                parse_sigma(tx, script, start_idx, &mut idx).map(Bitcom::Sigma)
            }
            _ => None,
        };
        if let Some(segment) = segment {
            segments.push(segment);
        }

        // Skip to the `|` separator that opens the next segment.
        let mut found_separator = false;
        while let Ok(op) = read_op(script, &mut idx) {
            if op.code == 1 && op.data == [SEPARATOR] {
                found_separator = true;
                break;
            }
        }
        if !found_separator {
            break;
        }
    }

    segments
}

fn parse_map(script: &[u8], idx: &mut usize) -> Option<BTreeMap<String, serde_json::Value>> {
    let verb = read_op(script, idx).ok()?;
    if verb.data != b"SET" {
        return None;
    }

    let mut map = BTreeMap::new();
    loop {
        let mut prev_idx = *idx;
        let key = match read_op(script, idx) {
            Ok(op) if !is_boundary(&op) => op,
            _ => {
                *idx = prev_idx;
                break;
            }
        };
        prev_idx = *idx;
        let value = match read_op(script, idx) {
            Ok(op) if !is_boundary(&op) => op,
            _ => {
                *idx = prev_idx;
                break;
            }
        };

        if key.data.len() > MAP_MAX_KEY_LEN || value.data.len() > MAP_MAX_VALUE_LEN {
            continue;
        }
        let key = match std::str::from_utf8(&key.data) {
            Ok("\u{0}") => "",
            Ok(key) => key,
            Err(_) => continue,
        };
        let value = match std::str::from_utf8(&value.data) {
            Ok("\u{0}") => "",
            Ok(value) => value,
            Err(_) => continue,
        };

        map.insert(key.to_string(), serde_json::Value::String(value.to_string()));
    }

    // `subTypeData` carries nested JSON worth surfacing as a document.
    if let Some(serde_json::Value::String(raw)) = map.get("subTypeData").cloned() {
        if raw.contains('\u{0}') || raw.contains("\\u0000") {
            map.remove("subTypeData");
        } else if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&raw) {
            map.insert("subTypeData".to_string(), parsed);
        }
    }

    Some(map)
}

fn parse_b(script: &[u8], idx: &mut usize) -> BFile {
    let mut file = BFile::default();
    for field in 0..4 {
        let prev_idx = *idx;
        let op = match read_op(script, idx) {
            Ok(op) if !is_boundary(&op) => op,
            _ => {
                *idx = prev_idx;
                break;
            }
        };
        match field {
            0 => file.content = op.data,
            1 => file.content_type = String::from_utf8_lossy(&op.data).into_owned(),
            2 => file.encoding = String::from_utf8_lossy(&op.data).into_owned(),
            _ => file.name = String::from_utf8_lossy(&op.data).into_owned(),
        }
    }
    let digest = Sha256::digest(&file.content);
    file.hash.copy_from_slice(&digest);
    file.size = file.content.len() as u32;
    file
}

fn parse_sigma(
    tx: &Transaction,
    script: &[u8],
    start_idx: usize,
    idx: &mut usize,
) -> Option<Sigma> {
    let mut algorithm = String::new();
    let mut address = String::new();
    let mut signature = Vec::new();
    let mut vin = 0u32;

    for field in 0..4 {
        let prev_idx = *idx;
        let op = match read_op(script, idx) {
            Ok(op) if !is_boundary(&op) => op,
            _ => {
                *idx = prev_idx;
                break;
            }
        };
        match field {
            0 => algorithm = String::from_utf8_lossy(&op.data).into_owned(),
            1 => address = String::from_utf8_lossy(&op.data).into_owned(),
            2 => signature = op.data,
            _ => vin = String::from_utf8_lossy(&op.data).parse().unwrap_or(0),
        }
    }

    let input = tx.inputs.get(vin as usize)?;
    let mut outpoint = input.prevout.txid.0.to_vec();
    outpoint.extend_from_slice(&input.prevout.vout.to_le_bytes());
    let input_hash = Sha256::digest(&outpoint);

    // The signed portion of the script ends just before this segment's
    // opening OP_RETURN or `|` separator.
    let script_buf = if start_idx >= 1 && script[start_idx - 1] == opcodes::OP_RETURN {
        &script[..start_idx - 1]
    } else if start_idx >= 2 && script[start_idx - 1] == SEPARATOR {
        &script[..start_idx - 2]
    } else {
        return None;
    };
    let output_hash = Sha256::digest(script_buf);

    let mut preimage = input_hash.to_vec();
    preimage.extend_from_slice(&output_hash);
    let mut message = [0u8; 32];
    message.copy_from_slice(&Sha256::digest(&preimage));

    Some(Sigma {
        algorithm,
        address,
        signature,
        vin,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::push_data;
    use crate::transaction::{Hash, Input, Output};
    use crate::{Outpoint, Script};

    fn tx_with_script(script: Vec<u8>) -> Transaction {
        Transaction::new(
            1,
            vec![Input {
                prevout: Outpoint::new(Hash([5u8; 32]), 0),
                unlock_script: Script(vec![]),
                sequence: 0,
            }],
            vec![Output {
                satoshis: 0,
                lock_script: Script(script),
            }],
            0,
        )
    }

    #[test]
    fn map_segment() {
        ordex_test::init();

        let mut script = vec![opcodes::OP_RETURN];
        push_data(&mut script, MAP_PREFIX.as_bytes());
        push_data(&mut script, b"SET");
        push_data(&mut script, b"app");
        push_data(&mut script, b"ordex");
        push_data(&mut script, b"type");
        push_data(&mut script, b"post");

        let segments = parse(&tx_with_script(script), 0);
        assert_eq!(segments.len(), 1);
        match &segments[0] {
            Bitcom::Map(map) => {
                assert_eq!(map["app"], serde_json::json!("ordex"));
                assert_eq!(map["type"], serde_json::json!("post"));
            }
            other => panic!("expected MAP, got {:?}", other),
        }
    }

    #[test]
    fn b_segment_with_separator() {
        ordex_test::init();

        let mut script = vec![opcodes::OP_RETURN];
        push_data(&mut script, B_PREFIX.as_bytes());
        push_data(&mut script, b"file-bytes");
        push_data(&mut script, b"text/plain");
        push_data(&mut script, b"utf-8");
        push_data(&mut script, b"readme.txt");
        push_data(&mut script, &[SEPARATOR]);
        push_data(&mut script, MAP_PREFIX.as_bytes());
        push_data(&mut script, b"SET");
        push_data(&mut script, b"k");
        push_data(&mut script, b"v");

        let segments = parse(&tx_with_script(script), 0);
        assert_eq!(segments.len(), 2);
        match &segments[0] {
            Bitcom::B(file) => {
                assert_eq!(file.content, b"file-bytes".to_vec());
                assert_eq!(file.content_type, "text/plain");
                assert_eq!(file.name, "readme.txt");
                assert_eq!(file.size, 10);
            }
            other => panic!("expected B, got {:?}", other),
        }
        assert!(matches!(&segments[1], Bitcom::Map(_)));
    }

    #[test]
    fn sigma_segment_message() {
        ordex_test::init();

        let mut script = vec![opcodes::OP_RETURN];
        push_data(&mut script, SIGMA_PREFIX.as_bytes());
        push_data(&mut script, b"BSM");
        push_data(&mut script, b"1BitcoinEaterAddressDontSendf59kuE");
        push_data(&mut script, &[0xaa; 65]);
        push_data(&mut script, b"0");

        let tx = tx_with_script(script.clone());
        let segments = parse(&tx, 0);
        assert_eq!(segments.len(), 1);
        match &segments[0] {
            Bitcom::Sigma(sigma) => {
                assert_eq!(sigma.algorithm, "BSM");
                assert_eq!(sigma.vin, 0);

                let mut outpoint = [5u8; 32].to_vec();
                outpoint.extend_from_slice(&0u32.to_le_bytes());
                let input_hash = Sha256::digest(&outpoint);
                // the signed script portion is everything before the
                // opening OP_RETURN, which here is empty
                let output_hash = Sha256::digest(&script[..0]);
                let mut preimage = input_hash.to_vec();
                preimage.extend_from_slice(&output_hash);
                let mut expected = [0u8; 32];
                expected.copy_from_slice(&Sha256::digest(&preimage));
                assert_eq!(sigma.message, expected);
            }
            other => panic!("expected SIGMA, got {:?}", other),
        }
    }

    #[test]
    fn garbage_segment_is_skipped() {
        ordex_test::init();

        let mut script = vec![opcodes::OP_RETURN];
        push_data(&mut script, b"SOMETHING-ELSE");
        push_data(&mut script, b"payload");

        assert!(parse(&tx_with_script(script), 0).is_empty());
    }

    #[test]
    fn no_op_return_means_no_segments() {
        ordex_test::init();

        let mut script = Vec::new();
        push_data(&mut script, b"just data");

        assert!(parse(&tx_with_script(script), 0).is_empty());
    }
}
