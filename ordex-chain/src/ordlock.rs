//! Market listing (OrdLock) recognition.
//!
//! A listed output locks the token behind the OrdLock covenant:
//! `<prefix> <seller pkhash> <payout output> <suffix>`. The payout push is
//! a fully serialized output (value + script) the buyer must reproduce, so
//! the ask price is read straight out of it. A spend whose unlocking
//! script carries the covenant suffix is a purchase (sale); any other
//! spend is a cancel.

use lazy_static::lazy_static;

use crate::script::read_op;
use crate::serialization::ChainDeserialize;
use crate::transaction::Output;
use crate::{PKHash, Script};

lazy_static! {
    /// Script fragment that opens the OrdLock covenant.
    pub static ref ORDLOCK_PREFIX: Vec<u8> = hex::decode(
        "2097dfd76851bf465e8f715593b217714858bbe9570ff3bd5e33840a34e20ff026\
         2102ba79df5f8ae7604a9830f03c7933028186aede0675a16f025dc4f8be8eec0382"
    )
    .expect("prefix constant is valid hex");

    /// Script fragment that closes the OrdLock covenant; its presence in
    /// an unlocking script marks a purchase.
    pub static ref ORDLOCK_SUFFIX: Vec<u8> = hex::decode(
        "615179547a75537a537a537a0079537a75527a527a7575615579014161517957795779\
         21414136d08c5ed2bf3ba048afe6dcaebafeffffffffffffffffffffffffffffff00\
         517951796151795179970079009f63007952799367007968517a75517a75517a7561\
         527a75517a517951795296a0630079527994527a75517a6853798277527982775379\
         012080517f517f517f517f517f517f517f517f517f517f517f517f517f517f517f51\
         7f517f517f517f517f517f517f517f517f517f517f517f517f517f517f517f517f7c\
         7e7c7e7c7e7c7e7c7e7c7e7c7e7c7e7c7e7c7e7c7e7c7e7c7e7c7e7c7e7c7e7c7e7c\
         7e7c7e7c7e7c7e7c7e7c7e7c7e7c7e7c7e7c7e7c7e7c7e7c7e7c7e01007e81517a75\
         61537a75527a527a5379535479937f75537f77527a75517a67007968517a75517a75\
         517a7561527a75517a6751790087637a75517a75617777777777"
    )
    .expect("suffix constant is valid hex");
}

/// An output listed for sale.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Listing {
    /// The ask price in satoshis, read from the required payout output.
    pub price: u64,
    /// The serialized payout output the purchase must recreate.
    #[serde(with = "hex")]
    pub payout: Vec<u8>,
    /// Price per whole token unit, scaled by the token's decimals. Filled
    /// in at index time once the token document is known.
    #[serde(rename = "pricePer", default)]
    pub price_per: f64,
    /// Set when the listing's spend was a purchase rather than a cancel.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sale: bool,
    /// The seller, paid through the payout output.
    #[serde(skip)]
    pub seller: Option<PKHash>,
}

/// Recognizes an OrdLock listing inside `script`.
///
/// The covenant may sit behind an inscription envelope, so the prefix is
/// located anywhere in the script rather than only at the front.
pub fn parse_listing(script: &Script) -> Option<Listing> {
    let bytes = script.as_bytes();
    let prefix: &[u8] = &ORDLOCK_PREFIX;
    let at = bytes
        .windows(prefix.len())
        .position(|window| window == prefix)?;

    let mut idx = at + prefix.len();
    let seller_op = read_op(bytes, &mut idx).ok()?;
    let payout_op = read_op(bytes, &mut idx).ok()?;
    if !bytes[idx..].starts_with(&ORDLOCK_SUFFIX[..]) {
        return None;
    }

    let seller = if seller_op.data.len() == 20 {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&seller_op.data);
        Some(PKHash(hash))
    } else {
        None
    };

    let payout = Output::chain_deserialize(&payout_op.data[..]).ok()?;

    Some(Listing {
        price: payout.satoshis,
        payout: payout_op.data,
        price_per: 0.0,
        sale: false,
        seller,
    })
}

/// A spend of a listed output is a sale when the unlocking script carries
/// the covenant suffix.
pub fn is_sale(unlock_script: &Script) -> bool {
    unlock_script.contains(&ORDLOCK_SUFFIX[..])
}

/// Test/fixture helper: a listing script for `seller` asking `price`.
pub fn build_listing(seller: &PKHash, price: u64, payout_script: &Script) -> Script {
    use crate::serialization::ChainSerialize;

    let payout = Output {
        satoshis: price,
        lock_script: payout_script.clone(),
    };
    let payout_bytes = payout
        .chain_serialize_to_vec()
        .expect("serializing to a vec is infallible");

    let mut bytes = ORDLOCK_PREFIX.to_vec();
    crate::script::push_data(&mut bytes, &seller.0);
    crate::script::push_data(&mut bytes, &payout_bytes);
    bytes.extend_from_slice(&ORDLOCK_SUFFIX[..]);
    Script(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_roundtrip() {
        ordex_test::init();

        let seller = PKHash([0x21; 20]);
        let payout_script = Script(vec![0x51]);
        let script = build_listing(&seller, 42_000, &payout_script);

        let listing = parse_listing(&script).expect("listing should parse");
        assert_eq!(listing.price, 42_000);
        assert_eq!(listing.seller, Some(seller));
        assert!(!listing.sale);
    }

    #[test]
    fn sale_detection() {
        ordex_test::init();

        let mut unlock = vec![0x41; 72];
        unlock.extend_from_slice(&ORDLOCK_SUFFIX[..]);

        assert!(is_sale(&Script(unlock)));
        assert!(!is_sale(&Script(vec![0x41; 72])));
    }

    #[test]
    fn plain_scripts_have_no_listing() {
        ordex_test::init();

        assert!(parse_listing(&Script(vec![0x76, 0xa9])).is_none());
        assert!(parse_listing(&Script(Vec::new())).is_none());
    }
}
