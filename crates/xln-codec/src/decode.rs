use crate::{CodecError, Item};

/// Decode a canonical RLP byte form back into an item.
///
/// Strict: trailing bytes, non-canonical length forms and truncated input
/// all fail. `decode(encode(x)) == x` holds for every item, and no other
/// byte string decodes to `x`.
pub fn decode(bytes: &[u8]) -> Result<Item, CodecError> {
    let (item, consumed) = parse_item(bytes)?;
    if consumed != bytes.len() {
        return Err(CodecError::TrailingBytes);
    }
    Ok(item)
}

/// Parse one item from the front of `buf`, returning it and the number of
/// bytes consumed.
fn parse_item(buf: &[u8]) -> Result<(Item, usize), CodecError> {
    let &prefix = buf.first().ok_or(CodecError::Malformed("empty input"))?;

    match prefix {
        // Single byte encoding itself.
        0x00..=0x7f => Ok((Item::Bytes(vec![prefix]), 1)),

        // Short byte string.
        0x80..=0xb7 => {
            let len = (prefix - 0x80) as usize;
            let payload = slice(buf, 1, len)?;
            if len == 1 && payload[0] < 0x80 {
                return Err(CodecError::Malformed("single byte below 0x80 must encode as itself"));
            }
            Ok((Item::Bytes(payload.to_vec()), 1 + len))
        }

        // Long byte string.
        0xb8..=0xbf => {
            let (len, header) = parse_long_length(buf, prefix - 0xb7)?;
            let payload = slice(buf, header, len)?;
            Ok((Item::Bytes(payload.to_vec()), header + len))
        }

        // Short list.
        0xc0..=0xf7 => {
            let len = (prefix - 0xc0) as usize;
            let payload = slice(buf, 1, len)?;
            Ok((Item::List(parse_list_payload(payload)?), 1 + len))
        }

        // Long list.
        0xf8..=0xff => {
            let (len, header) = parse_long_length(buf, prefix - 0xf7)?;
            let payload = slice(buf, header, len)?;
            Ok((Item::List(parse_list_payload(payload)?), header + len))
        }
    }
}

/// Parse the big-endian length of a long-form item. Canonical: no leading
/// zero byte, and the value must actually require the long form (> 55).
fn parse_long_length(buf: &[u8], len_of_len: u8) -> Result<(usize, usize), CodecError> {
    let len_of_len = len_of_len as usize;
    let len_bytes = slice(buf, 1, len_of_len)?;
    if len_bytes[0] == 0 {
        return Err(CodecError::Malformed("length has leading zero byte"));
    }
    let mut len: usize = 0;
    for &b in len_bytes {
        len = len
            .checked_mul(256)
            .and_then(|l| l.checked_add(b as usize))
            .ok_or(CodecError::Malformed("length overflow"))?;
    }
    if len <= 55 {
        return Err(CodecError::Malformed("long form used for short payload"));
    }
    Ok((len, 1 + len_of_len))
}

fn parse_list_payload(mut payload: &[u8]) -> Result<Vec<Item>, CodecError> {
    let mut items = Vec::new();
    while !payload.is_empty() {
        let (item, consumed) = parse_item(payload)?;
        items.push(item);
        payload = &payload[consumed..];
    }
    Ok(items)
}

fn slice(buf: &[u8], start: usize, len: usize) -> Result<&[u8], CodecError> {
    buf.get(start..start + len)
        .ok_or(CodecError::Malformed("input shorter than declared length"))
}
