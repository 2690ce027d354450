//! exFAT directory entry sets: one File entry, one Stream Extension entry and
//! 1..=17 File Name entries, 32 bytes each.

pub mod name;
pub mod time;

use heapless::Vec;

use crate::{error::CorruptEntry, CHARS_PER_FRAGMENT, DIR_ENTRY_SIZE, MAX_NAME_LEN};
use name::{name_hash, NameBuf};
use time::DateTime;

pub(crate) const ENTRY_TYPE_END: u8 = 0x00;
pub(crate) const ENTRY_IN_USE: u8 = 0x80;
pub(crate) const ENTRY_TYPE_BITMAP: u8 = 0x81;
pub(crate) const ENTRY_TYPE_UPCASE: u8 = 0x82;
pub(crate) const ENTRY_TYPE_LABEL: u8 = 0x83;
pub(crate) const ENTRY_TYPE_FILE: u8 = 0x85;
pub(crate) const ENTRY_TYPE_STREAM: u8 = 0xC0;
pub(crate) const ENTRY_TYPE_NAME: u8 = 0xC1;

pub const ATTRIB_READ_ONLY: u16 = 0x01;
pub const ATTRIB_HIDDEN: u16 = 0x02;
pub const ATTRIB_SYSTEM: u16 = 0x04;
pub const ATTRIB_DIRECTORY: u16 = 0x10;
pub const ATTRIB_ARCHIVE: u16 = 0x20;

const STREAM_ALLOCATION_POSSIBLE: u8 = 0x01;
const STREAM_NO_FAT_CHAIN: u8 = 0x02;

pub const MAX_NAME_FRAGMENTS: usize = MAX_NAME_LEN.div_ceil(CHARS_PER_FRAGMENT);
pub const MAX_SET_ENTRIES: usize = MAX_NAME_FRAGMENTS + 2;

pub type RawEntry = [u8; DIR_ENTRY_SIZE];
pub type EntrySetBuf = Vec<RawEntry, MAX_SET_ENTRIES>;

/// Metadata carried by the File and Stream Extension entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryMeta {
    pub attributes: u16,
    pub create_time: DateTime,
    pub modify_time: DateTime,
    pub access_time: DateTime,
    pub valid_length: u64,
    pub data_length: u64,
    pub first_cluster: u32,
    pub contiguous: bool,
}

impl EntryMeta {
    pub fn new(attributes: u16, now: DateTime) -> Self {
        Self {
            attributes,
            create_time: now,
            modify_time: now,
            access_time: now,
            valid_length: 0,
            data_length: 0,
            first_cluster: 0,
            contiguous: false,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.attributes & ATTRIB_DIRECTORY != 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedSet {
    pub meta: EntryMeta,
    pub name: NameBuf,
}

/// Number of entries in the set for a name of `name_len` UTF-16 units.
pub fn set_count_for(name_len: usize) -> usize {
    name_len.div_ceil(CHARS_PER_FRAGMENT) + 2
}

/// 16-bit rotate-right-add over the whole set, skipping the checksum field.
pub fn set_checksum(set: &[RawEntry]) -> u16 {
    let mut checksum = 0u16;
    for (entry_idx, entry) in set.iter().enumerate() {
        for (byte_idx, byte) in entry.iter().enumerate() {
            if entry_idx == 0 && (byte_idx == 2 || byte_idx == 3) {
                continue;
            }
            checksum = checksum.rotate_right(1).wrapping_add(*byte as u16);
        }
    }
    checksum
}

pub fn decode(raw: &[RawEntry]) -> Result<DecodedSet, CorruptEntry> {
    let (primary, secondary) = raw.split_first().ok_or(CorruptEntry)?;
    if primary[0] != ENTRY_TYPE_FILE {
        return Err(CorruptEntry);
    }
    let secondary_count = primary[1] as usize;
    if secondary_count < 2 || secondary.len() != secondary_count {
        return Err(CorruptEntry);
    }
    if read_u16(primary, 2) != set_checksum(raw) {
        return Err(CorruptEntry);
    }

    let stream = &secondary[0];
    if stream[0] != ENTRY_TYPE_STREAM {
        return Err(CorruptEntry);
    }
    let name_len = stream[3] as usize;
    if name_len == 0 || name_len.div_ceil(CHARS_PER_FRAGMENT) != secondary_count - 1 {
        return Err(CorruptEntry);
    }

    let mut name = NameBuf::new();
    for fragment in &secondary[1..] {
        if fragment[0] != ENTRY_TYPE_NAME {
            return Err(CorruptEntry);
        }
        for unit in fragment[2..].chunks_exact(2) {
            if name.len() == name_len {
                break;
            }
            name.push(u16::from_le_bytes([unit[0], unit[1]]))
                .map_err(|_| CorruptEntry)?;
        }
    }

    let flags = stream[1];
    let meta = EntryMeta {
        attributes: read_u16(primary, 4),
        create_time: unpack_time(read_u32(primary, 8), primary[20]),
        modify_time: unpack_time(read_u32(primary, 12), primary[21]),
        access_time: unpack_time(read_u32(primary, 16), 0),
        valid_length: read_u64(stream, 8),
        first_cluster: read_u32(stream, 20),
        data_length: read_u64(stream, 24),
        contiguous: flags & STREAM_NO_FAT_CHAIN != 0,
    };
    if meta.valid_length > meta.data_length {
        return Err(CorruptEntry);
    }
    Ok(DecodedSet { meta, name })
}

pub fn encode(meta: &EntryMeta, name: &[u16]) -> Result<EntrySetBuf, CorruptEntry> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(CorruptEntry);
    }
    let count = set_count_for(name.len());
    let mut set = EntrySetBuf::new();

    let mut primary = [0u8; DIR_ENTRY_SIZE];
    primary[0] = ENTRY_TYPE_FILE;
    primary[1] = (count - 1) as u8;
    write_u16(&mut primary, 4, meta.attributes);
    write_u32(&mut primary, 8, meta.create_time.pack());
    write_u32(&mut primary, 12, meta.modify_time.pack());
    write_u32(&mut primary, 16, meta.access_time.pack());
    primary[20] = meta.create_time.centiseconds();
    primary[21] = meta.modify_time.centiseconds();
    set.push(primary).map_err(|_| CorruptEntry)?;

    let mut stream = [0u8; DIR_ENTRY_SIZE];
    stream[0] = ENTRY_TYPE_STREAM;
    stream[1] = STREAM_ALLOCATION_POSSIBLE;
    if meta.contiguous && meta.first_cluster != 0 {
        stream[1] |= STREAM_NO_FAT_CHAIN;
    }
    stream[3] = name.len() as u8;
    write_u16(&mut stream, 4, name_hash(name));
    write_u64(&mut stream, 8, meta.valid_length);
    write_u32(&mut stream, 20, meta.first_cluster);
    write_u64(&mut stream, 24, meta.data_length);
    set.push(stream).map_err(|_| CorruptEntry)?;

    for chunk in name.chunks(CHARS_PER_FRAGMENT) {
        let mut fragment = [0u8; DIR_ENTRY_SIZE];
        fragment[0] = ENTRY_TYPE_NAME;
        for (idx, unit) in chunk.iter().enumerate() {
            write_u16(&mut fragment, 2 + idx * 2, *unit);
        }
        set.push(fragment).map_err(|_| CorruptEntry)?;
    }

    let checksum = set_checksum(&set);
    write_u16(&mut set[0], 2, checksum);
    Ok(set)
}

fn unpack_time(packed: u32, centiseconds: u8) -> DateTime {
    let mut time = DateTime::unpack(packed);
    if centiseconds >= 100 {
        time.second += 1;
    }
    time
}

pub(crate) fn read_u16(entry: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([entry[offset], entry[offset + 1]])
}

pub(crate) fn read_u32(entry: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        entry[offset],
        entry[offset + 1],
        entry[offset + 2],
        entry[offset + 3],
    ])
}

pub(crate) fn read_u64(entry: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&entry[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

pub(crate) fn write_u16(entry: &mut [u8], offset: usize, value: u16) {
    entry[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u32(entry: &mut [u8], offset: usize, value: u32) {
    entry[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u64(entry: &mut [u8], offset: usize, value: u64) {
    entry[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests;
