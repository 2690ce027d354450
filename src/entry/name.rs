use heapless::Vec;

use crate::{error::IllegalName, MAX_NAME_LEN};

pub type NameBuf = Vec<u16, MAX_NAME_LEN>;

/// Simple upper-case mapping used for name comparison and hashing.
///
/// ASCII is mapped directly. Other BMP units map to their single-unit
/// Unicode upper case when one exists; surrogates map to themselves.
pub fn up_case(unit: u16) -> u16 {
    if unit < 0x80 {
        return (unit as u8).to_ascii_uppercase() as u16;
    }
    let Some(ch) = char::from_u32(unit as u32) else {
        return unit;
    };
    let mut upper = ch.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(single), None) if (single as u32) <= 0xFFFF => single as u32 as u16,
        _ => unit,
    }
}

/// 16-bit rotate-right-add over the up-cased name, low byte first.
pub fn name_hash(name: &[u16]) -> u16 {
    let mut hash = 0u16;
    for &unit in name {
        let upper = up_case(unit);
        hash = hash.rotate_right(1).wrapping_add(upper & 0xFF);
        hash = hash.rotate_right(1).wrapping_add(upper >> 8);
    }
    hash
}

pub fn names_equal(a: &[u16], b: &[u16]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| up_case(*x) == up_case(*y))
}

pub fn encode_name(name: &str) -> Result<NameBuf, IllegalName> {
    let mut out = NameBuf::new();
    for unit in name.encode_utf16() {
        out.push(unit).map_err(|_| IllegalName)?;
    }
    if out.is_empty() {
        return Err(IllegalName);
    }
    Ok(out)
}

/// Writes `name` as UTF-8 into `out`, stopping before a character that does
/// not fit. Unpaired surrogates become U+FFFD.
pub fn decode_name(name: &[u16], out: &mut [u8]) -> usize {
    let mut len = 0usize;
    for ch in char::decode_utf16(name.iter().copied()) {
        let ch = ch.unwrap_or(char::REPLACEMENT_CHARACTER);
        let needed = ch.len_utf8();
        if len + needed > out.len() {
            break;
        }
        ch.encode_utf8(&mut out[len..len + needed]);
        len += needed;
    }
    len
}
