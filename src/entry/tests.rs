use super::{
    decode, encode,
    name::{decode_name, encode_name, name_hash, names_equal, up_case},
    set_checksum, set_count_for,
    time::DateTime,
    EntryMeta, ATTRIB_ARCHIVE, ATTRIB_DIRECTORY, ENTRY_TYPE_FILE, ENTRY_TYPE_NAME,
    ENTRY_TYPE_STREAM,
};

fn sample_meta() -> EntryMeta {
    EntryMeta {
        attributes: ATTRIB_ARCHIVE,
        create_time: DateTime::new(2023, 5, 17, 13, 45, 31),
        modify_time: DateTime::new(2024, 2, 29, 23, 59, 58),
        access_time: DateTime::new(2024, 3, 1, 0, 0, 0),
        valid_length: 1000,
        data_length: 4096,
        first_cluster: 42,
        contiguous: true,
    }
}

#[test]
fn encode_lays_out_file_stream_and_name_entries() {
    let name = encode_name("hello.txt").unwrap();
    let set = encode(&sample_meta(), &name).unwrap();

    assert_eq!(set.len(), 3);
    assert_eq!(set[0][0], ENTRY_TYPE_FILE);
    assert_eq!(set[0][1], 2);
    assert_eq!(u16::from_le_bytes([set[0][4], set[0][5]]), ATTRIB_ARCHIVE);
    assert_eq!(set[1][0], ENTRY_TYPE_STREAM);
    assert_eq!(set[1][1], 0x03);
    assert_eq!(set[1][3], 9);
    assert_eq!(u16::from_le_bytes([set[1][4], set[1][5]]), name_hash(&name));
    assert_eq!(&set[1][8..16], &1000u64.to_le_bytes());
    assert_eq!(&set[1][20..24], &42u32.to_le_bytes());
    assert_eq!(&set[1][24..32], &4096u64.to_le_bytes());
    assert_eq!(set[2][0], ENTRY_TYPE_NAME);
    assert_eq!(&set[2][2..4], &[b'h', 0]);
    assert_eq!(u16::from_le_bytes([set[0][2], set[0][3]]), set_checksum(&set));
}

#[test]
fn decode_recovers_metadata_and_name() {
    let name = encode_name("A much longer file name.data").unwrap();
    let set = encode(&sample_meta(), &name).unwrap();
    let decoded = decode(&set).unwrap();

    assert_eq!(decoded.meta, sample_meta());
    assert_eq!(&decoded.name[..], &name[..]);
}

#[test]
fn fragment_count_follows_name_length() {
    assert_eq!(set_count_for(1), 3);
    assert_eq!(set_count_for(15), 3);
    assert_eq!(set_count_for(16), 4);
    assert_eq!(set_count_for(255), 19);

    let long: String = core::iter::repeat('x').take(255).collect();
    let name = encode_name(&long).unwrap();
    let set = encode(&sample_meta(), &name).unwrap();
    assert_eq!(set.len(), 19);
    assert_eq!(set[0][1], 18);
    assert_eq!(decode(&set).unwrap().name.len(), 255);
}

#[test]
fn empty_or_unallocated_file_clears_no_fat_chain() {
    let mut meta = sample_meta();
    meta.first_cluster = 0;
    meta.data_length = 0;
    meta.valid_length = 0;
    let set = encode(&meta, &encode_name("x").unwrap()).unwrap();
    assert_eq!(set[1][1], 0x01);
    assert!(!decode(&set).unwrap().meta.contiguous);
}

#[test]
fn checksum_mismatch_is_corrupt() {
    let name = encode_name("data.bin").unwrap();
    let mut set = encode(&sample_meta(), &name).unwrap();
    set[1][8] ^= 0x01;
    assert!(decode(&set).is_err());
}

#[test]
fn structural_mismatches_are_corrupt() {
    let name = encode_name("data.bin").unwrap();
    let set = encode(&sample_meta(), &name).unwrap();

    assert!(decode(&set[..2]).is_err());

    let mut wrong_type = set.clone();
    wrong_type[2][0] = ENTRY_TYPE_STREAM;
    let checksum = set_checksum(&wrong_type);
    wrong_type[0][2..4].copy_from_slice(&checksum.to_le_bytes());
    assert!(decode(&wrong_type).is_err());

    let mut wrong_length = set.clone();
    wrong_length[1][3] = 16;
    let checksum = set_checksum(&wrong_length);
    wrong_length[0][2..4].copy_from_slice(&checksum.to_le_bytes());
    assert!(decode(&wrong_length).is_err());

    let mut deleted = set.clone();
    deleted[0][0] &= 0x7F;
    assert!(decode(&deleted).is_err());
}

#[test]
fn valid_length_beyond_data_length_is_corrupt() {
    let mut meta = sample_meta();
    meta.valid_length = meta.data_length + 1;
    let set = encode(&meta, &encode_name("x").unwrap()).unwrap();
    assert!(decode(&set).is_err());
}

#[test]
fn name_hash_and_compare_ignore_case() {
    let lower = encode_name("readme.md").unwrap();
    let upper = encode_name("README.MD").unwrap();
    assert_eq!(name_hash(&lower), name_hash(&upper));
    assert!(names_equal(&lower, &upper));
    assert!(!names_equal(&lower, &encode_name("readme.m").unwrap()));
    assert_eq!(up_case('é' as u16), 'É' as u16);
    assert_eq!(up_case(0xD800), 0xD800);
}

#[test]
fn surrogate_pairs_stay_whole_units_across_fragments() {
    let mut text = String::new();
    for _ in 0..14 {
        text.push('a');
    }
    text.push('\u{1F600}');
    let name = encode_name(&text).unwrap();
    assert_eq!(name.len(), 16);

    let set = encode(&sample_meta(), &name).unwrap();
    assert_eq!(set.len(), 4);
    let decoded = decode(&set).unwrap();
    let mut out = [0u8; 64];
    let len = decode_name(&decoded.name, &mut out);
    assert_eq!(&out[..len], text.as_bytes());
}

#[test]
fn decode_name_stops_at_character_boundary() {
    let name = encode_name("aé").unwrap();
    let mut out = [0u8; 2];
    assert_eq!(decode_name(&name, &mut out), 1);
    assert_eq!(out[0], b'a');
}

#[test]
fn timestamps_pack_to_dos_layout() {
    let time = DateTime::new(2021, 12, 25, 8, 30, 14);
    let packed = time.pack();
    assert_eq!(packed >> 25, 41);
    assert_eq!((packed >> 21) & 0x0F, 12);
    assert_eq!((packed >> 16) & 0x1F, 25);
    assert_eq!((packed >> 11) & 0x1F, 8);
    assert_eq!((packed >> 5) & 0x3F, 30);
    assert_eq!(packed & 0x1F, 7);
    assert_eq!(DateTime::unpack(packed), time);
    assert_eq!(DateTime::new(1970, 1, 1, 0, 0, 0).pack() >> 25, 0);
}

#[test]
fn directory_attribute_is_reported() {
    let mut meta = sample_meta();
    meta.attributes = ATTRIB_DIRECTORY;
    assert!(meta.is_dir());
}
