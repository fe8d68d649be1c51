//! Canonical RLP encoding for the XLN kernel.
//!
//! Everything that is hashed, signed or persisted goes through this crate,
//! so the rules are deliberately strict: every value has exactly one valid
//! encoding, and `decode` rejects anything else. Scalars are unsigned
//! minimal big-endian byte strings; callers normalize signed quantities
//! before they reach the codec.

use thiserror::Error;

mod decode;
mod encode;

pub use decode::decode;
pub use encode::encode;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed rlp: {0}")]
    Malformed(&'static str),

    #[error("non-minimal integer encoding")]
    NonMinimalInteger,

    #[error("trailing bytes after top-level item")]
    TrailingBytes,
}

// ── Item ─────────────────────────────────────────────────────────────────────

/// An RLP value: a byte string or a list of items.
///
/// RLP has no scalar type on the wire; unsigned integers are byte strings
/// in minimal big-endian form (zero is the empty string). The `uint` /
/// `as_uint` helpers enforce that form on both sides.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Item {
    Bytes(Vec<u8>),
    List(Vec<Item>),
}

impl Item {
    pub fn bytes(b: impl AsRef<[u8]>) -> Self {
        Item::Bytes(b.as_ref().to_vec())
    }

    pub fn list(items: Vec<Item>) -> Self {
        Item::List(items)
    }

    /// Minimal big-endian scalar. Zero encodes as the empty byte string.
    pub fn uint(n: u128) -> Self {
        let be = n.to_be_bytes();
        let first = be.iter().position(|&b| b != 0).unwrap_or(be.len());
        Item::Bytes(be[first..].to_vec())
    }

    /// Encode an `Option` as a zero- or one-element list.
    pub fn opt(inner: Option<Item>) -> Self {
        Item::List(inner.into_iter().collect())
    }

    pub fn as_bytes(&self) -> Result<&[u8], CodecError> {
        match self {
            Item::Bytes(b) => Ok(b),
            Item::List(_) => Err(CodecError::Malformed("expected bytes, found list")),
        }
    }

    pub fn as_list(&self) -> Result<&[Item], CodecError> {
        match self {
            Item::List(items) => Ok(items),
            Item::Bytes(_) => Err(CodecError::Malformed("expected list, found bytes")),
        }
    }

    pub fn as_uint(&self) -> Result<u128, CodecError> {
        let b = self.as_bytes()?;
        if b.len() > 16 {
            return Err(CodecError::Malformed("scalar wider than 128 bits"));
        }
        if b.first() == Some(&0) {
            return Err(CodecError::NonMinimalInteger);
        }
        let mut be = [0u8; 16];
        be[16 - b.len()..].copy_from_slice(b);
        Ok(u128::from_be_bytes(be))
    }

    pub fn as_u64(&self) -> Result<u64, CodecError> {
        let n = self.as_uint()?;
        u64::try_from(n).map_err(|_| CodecError::Malformed("scalar wider than 64 bits"))
    }

    /// Byte string of exactly `N` bytes.
    pub fn as_array<const N: usize>(&self) -> Result<[u8; N], CodecError> {
        let b = self.as_bytes()?;
        if b.len() != N {
            return Err(CodecError::Malformed("unexpected byte-string length"));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(b);
        Ok(out)
    }

    /// Decode a zero- or one-element list written by [`Item::opt`].
    pub fn as_opt(&self) -> Result<Option<&Item>, CodecError> {
        let items = self.as_list()?;
        match items.len() {
            0 => Ok(None),
            1 => Ok(Some(&items[0])),
            _ => Err(CodecError::Malformed("optional list longer than one")),
        }
    }
}

// ── Conversion trait ─────────────────────────────────────────────────────────

/// Conversion between a domain value and its canonical RLP item.
///
/// `to_item` must be injective and iterate any associative content in key
/// order; the byte encoding of the item is the value's one true form.
pub trait Rlp: Sized {
    fn to_item(&self) -> Item;
    fn from_item(item: &Item) -> Result<Self, CodecError>;

    fn to_rlp(&self) -> Vec<u8> {
        encode(&self.to_item())
    }

    fn from_rlp(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_item(&decode(bytes)?)
    }
}

/// Encode a sequence of `Rlp` values as a list item.
pub fn list_of<T: Rlp>(values: &[T]) -> Item {
    Item::List(values.iter().map(Rlp::to_item).collect())
}

/// Decode a list item into a vector of `Rlp` values.
pub fn vec_of<T: Rlp>(item: &Item) -> Result<Vec<T>, CodecError> {
    item.as_list()?.iter().map(T::from_item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc_hex(item: &Item) -> String {
        hex::encode(encode(item))
    }

    // ── Ethereum canonical vectors ────────────────────────────────────────────

    #[test]
    fn dog_vector() {
        assert_eq!(enc_hex(&Item::bytes("dog")), "83646f67");
    }

    #[test]
    fn cat_dog_list_vector() {
        let item = Item::list(vec![Item::bytes("cat"), Item::bytes("dog")]);
        assert_eq!(enc_hex(&item), "c88363617483646f67");
    }

    #[test]
    fn empty_string_and_list_vectors() {
        assert_eq!(enc_hex(&Item::bytes("")), "80");
        assert_eq!(enc_hex(&Item::list(vec![])), "c0");
    }

    #[test]
    fn scalar_vectors() {
        assert_eq!(enc_hex(&Item::uint(0)), "80");
        assert_eq!(enc_hex(&Item::uint(15)), "0f");
        assert_eq!(enc_hex(&Item::uint(1024)), "820400");
    }

    #[test]
    fn single_byte_below_0x80_is_itself() {
        assert_eq!(enc_hex(&Item::bytes([0x7f])), "7f");
        assert_eq!(enc_hex(&Item::bytes([0x80])), "8180");
    }

    #[test]
    fn long_string_vector() {
        // "Lorem ipsum dolor sit amet, consectetur adipisicing elit" (56 bytes)
        let s = "Lorem ipsum dolor sit amet, consectetur adipisicing elit";
        let encoded = encode(&Item::bytes(s));
        assert_eq!(encoded[0], 0xb8);
        assert_eq!(encoded[1], 56);
        assert_eq!(&encoded[2..], s.as_bytes());
    }

    #[test]
    fn set_theoretical_representation_of_three() {
        // [ [], [[]], [ [], [[]] ] ]
        let item = Item::list(vec![
            Item::list(vec![]),
            Item::list(vec![Item::list(vec![])]),
            Item::list(vec![Item::list(vec![]), Item::list(vec![Item::list(vec![])])]),
        ]);
        assert_eq!(enc_hex(&item), "c7c0c1c0c3c0c1c0");
    }

    // ── Roundtrip and strictness ──────────────────────────────────────────────

    #[test]
    fn roundtrip_nested() {
        let item = Item::list(vec![
            Item::uint(7),
            Item::bytes([0xde, 0xad, 0xbe, 0xef]),
            Item::list(vec![Item::uint(0), Item::bytes(vec![0u8; 60])]),
        ]);
        let bytes = encode(&item);
        assert_eq!(decode(&bytes).unwrap(), item);
    }

    #[test]
    fn roundtrip_long_list() {
        let inner: Vec<Item> = (0u128..40).map(|i| Item::uint(1000 + i)).collect();
        let item = Item::list(inner);
        let bytes = encode(&item);
        assert!(bytes[0] >= 0xf8, "forty 2-byte scalars exceed the short-list form");
        assert_eq!(decode(&bytes).unwrap(), item);
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = encode(&Item::bytes("dog"));
        bytes.push(0x00);
        assert_eq!(decode(&bytes), Err(CodecError::TrailingBytes));
    }

    #[test]
    fn non_canonical_single_byte_rejected() {
        // 0x81 0x05 wraps a byte that must encode as itself.
        assert!(matches!(decode(&[0x81, 0x05]), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn long_form_for_short_payload_rejected() {
        // 0xb8 0x03 "dog": 3-byte payload does not need the long form.
        assert!(matches!(
            decode(&[0xb8, 0x03, b'd', b'o', b'g']),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn length_with_leading_zero_rejected() {
        // Long string whose length bytes start with 0x00.
        let mut bytes = vec![0xb9, 0x00, 0x38];
        bytes.extend(std::iter::repeat(b'x').take(56));
        assert!(matches!(decode(&bytes), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn truncated_input_rejected() {
        assert!(matches!(decode(&[0x83, b'd', b'o']), Err(CodecError::Malformed(_))));
        assert!(matches!(decode(&[]), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn scalar_with_leading_zero_rejected() {
        let item = decode(&[0x82, 0x00, 0x04]).unwrap();
        assert_eq!(item.as_uint(), Err(CodecError::NonMinimalInteger));
    }

    #[test]
    fn opt_roundtrip() {
        let some = Item::opt(Some(Item::uint(9)));
        let none = Item::opt(None);
        assert_eq!(some.as_opt().unwrap().unwrap().as_uint().unwrap(), 9);
        assert!(none.as_opt().unwrap().is_none());
    }
}
