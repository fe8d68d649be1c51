use crate::Item;

/// Encode an item to its canonical RLP byte form.
pub fn encode(item: &Item) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(item, &mut out);
    out
}

fn encode_into(item: &Item, out: &mut Vec<u8>) {
    match item {
        Item::Bytes(b) => {
            if b.len() == 1 && b[0] < 0x80 {
                out.push(b[0]);
            } else {
                write_length(out, b.len(), 0x80);
                out.extend_from_slice(b);
            }
        }
        Item::List(items) => {
            let mut payload = Vec::new();
            for it in items {
                encode_into(it, &mut payload);
            }
            write_length(out, payload.len(), 0xc0);
            out.extend_from_slice(&payload);
        }
    }
}

/// Write the short- or long-form length prefix. `base` is 0x80 for byte
/// strings and 0xc0 for lists.
fn write_length(out: &mut Vec<u8>, len: usize, base: u8) {
    if len <= 55 {
        out.push(base + len as u8);
    } else {
        let be = (len as u64).to_be_bytes();
        let first = be.iter().position(|&b| b != 0).unwrap_or(7);
        let len_bytes = &be[first..];
        out.push(base + 55 + len_bytes.len() as u8);
        out.extend_from_slice(len_bytes);
    }
}
