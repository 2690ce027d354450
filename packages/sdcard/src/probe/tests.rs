use super::{
    card::{SdCardVersion, SdFilesystem, SdProbeStatus},
    helpers::{csd_get_bits, decode_capacity_bytes, detect_vbr_filesystem, first_partition},
};

fn set_bits(csd: &mut [u8; 16], msb: u8, lsb: u8, value: u32) {
    for bit in lsb..=msb {
        let byte_idx = ((127 - bit) / 8) as usize;
        let bit_in_byte = bit % 8;
        let v = (value >> (bit - lsb)) & 1;
        if v == 1 {
            csd[byte_idx] |= 1 << bit_in_byte;
        } else {
            csd[byte_idx] &= !(1 << bit_in_byte);
        }
    }
}

#[test]
fn csd_bits_round_trip_through_setter() {
    let mut csd = [0u8; 16];
    set_bits(&mut csd, 69, 48, 0x3A_BCDE);
    assert_eq!(csd_get_bits(&csd, 69, 48), 0x3A_BCDE);
}

#[test]
fn csd_v2_capacity_is_c_size_plus_one_times_512k() {
    let mut csd = [0u8; 16];
    set_bits(&mut csd, 127, 126, 1);
    set_bits(&mut csd, 69, 48, 15_159);
    assert_eq!(decode_capacity_bytes(&csd), Some(15_160 * 512 * 1024));
}

#[test]
fn csd_v1_capacity_uses_mult_and_block_len() {
    let mut csd = [0u8; 16];
    set_bits(&mut csd, 127, 126, 0);
    set_bits(&mut csd, 73, 62, 4095);
    set_bits(&mut csd, 49, 47, 7);
    set_bits(&mut csd, 83, 80, 9);
    assert_eq!(decode_capacity_bytes(&csd), Some(4096 * 512 * 512));
}

#[test]
fn csd_reserved_structure_is_rejected() {
    let mut csd = [0u8; 16];
    set_bits(&mut csd, 127, 126, 3);
    assert_eq!(decode_capacity_bytes(&csd), None);
}

#[test]
fn vbr_detection_recognises_exfat_and_fat32() {
    let mut sector = [0u8; 512];
    sector[3..11].copy_from_slice(b"EXFAT   ");
    assert_eq!(detect_vbr_filesystem(&sector), Some(SdFilesystem::ExFat));

    let mut sector = [0u8; 512];
    sector[82..90].copy_from_slice(b"FAT32   ");
    assert_eq!(detect_vbr_filesystem(&sector), Some(SdFilesystem::Fat32));

    assert_eq!(detect_vbr_filesystem(&[0u8; 512]), None);
}

#[test]
fn mbr_first_partition_skips_empty_slots() {
    let mut sector = [0u8; 512];
    sector[510] = 0x55;
    sector[511] = 0xAA;
    let slot = 446 + 16;
    sector[slot + 4] = 0x07;
    sector[slot + 8..slot + 12].copy_from_slice(&8192u32.to_le_bytes());
    assert_eq!(first_partition(&sector), Some((0x07, 8192)));

    sector[510] = 0;
    assert_eq!(first_partition(&sector), None);
}

#[test]
fn probe_status_sector_count_saturates() {
    let status = SdProbeStatus {
        version: SdCardVersion::V2,
        high_capacity: true,
        capacity_bytes: 4 * 1024 * 1024,
        filesystem: SdFilesystem::ExFat,
    };
    assert_eq!(status.sector_count(), 8192);

    let huge = SdProbeStatus {
        capacity_bytes: u64::MAX,
        ..status
    };
    assert_eq!(huge.sector_count(), u32::MAX);
}
