use crate::{
    entry::{read_u16, read_u32, read_u64},
    error::CorruptEntry,
    Block,
};

pub(crate) const EXFAT_OEM_NAME: &[u8; 8] = b"EXFAT   ";
pub(crate) const BOOT_REGION_SECTORS: u32 = 12;
pub(crate) const CHECKSUM_SECTOR: u32 = 11;
const MBR_TYPE_EXFAT: u8 = 0x07;
/// Largest cluster count whose cluster numbers stay below the FAT markers.
const MAX_CLUSTER_COUNT: u32 = 0xFFFF_FFF5;
/// One past the last sector a `u32` LBA can name.
const MAX_LBA_END: u64 = u32::MAX as u64 + 1;

/// Fields of the main boot sector that the driver relies on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BootParams {
    pub volume_length: u64,
    pub fat_offset: u32,
    pub fat_length: u32,
    pub cluster_heap_offset: u32,
    pub cluster_count: u32,
    pub root_cluster: u32,
    pub serial: u32,
    pub sectors_per_cluster_shift: u8,
    pub fat_count: u8,
}

pub(crate) fn is_exfat_boot_sector(sector: &Block) -> bool {
    &sector[3..11] == EXFAT_OEM_NAME
}

/// Parses the boot sector of a volume starting at `partition_start`.
///
/// Every sector the geometry can address must fit in a `u32` LBA, so later
/// cluster and FAT arithmetic cannot overflow.
pub(crate) fn parse_boot_sector(sector: &Block, partition_start: u32) -> Result<BootParams, CorruptEntry> {
    if !is_exfat_boot_sector(sector) || sector[510] != 0x55 || sector[511] != 0xAA {
        return Err(CorruptEntry);
    }
    // MustBeZero covers the BPB of FAT12/16/32.
    if sector[11..64].iter().any(|b| *b != 0) {
        return Err(CorruptEntry);
    }
    let params = BootParams {
        volume_length: read_u64(sector, 72),
        fat_offset: read_u32(sector, 80),
        fat_length: read_u32(sector, 84),
        cluster_heap_offset: read_u32(sector, 88),
        cluster_count: read_u32(sector, 92),
        root_cluster: read_u32(sector, 96),
        serial: read_u32(sector, 100),
        sectors_per_cluster_shift: sector[109],
        fat_count: sector[110],
    };
    let bytes_per_sector_shift = sector[108];
    if bytes_per_sector_shift != 9
        || params.sectors_per_cluster_shift > 16
        || !(1..=2).contains(&params.fat_count)
        || read_u16(sector, 104) >> 8 != 1
    {
        return Err(CorruptEntry);
    }
    let cluster_count = params.cluster_count as u64;
    if params.cluster_count == 0
        || params.cluster_count > MAX_CLUSTER_COUNT
        || params.fat_offset < 24
        || (params.cluster_heap_offset as u64) < params.fat_offset as u64 + params.fat_length as u64
        || (params.fat_length as u64) * 128 < cluster_count + 2
    {
        return Err(CorruptEntry);
    }
    let heap_sectors = cluster_count << params.sectors_per_cluster_shift;
    let heap_end = params.cluster_heap_offset as u64 + heap_sectors;
    if heap_end > params.volume_length || partition_start as u64 + heap_end > MAX_LBA_END {
        return Err(CorruptEntry);
    }
    if params.root_cluster < 2 || params.root_cluster as u64 > cluster_count + 1 {
        return Err(CorruptEntry);
    }
    Ok(params)
}

/// Folds one boot-region sector into the running boot checksum. The
/// VolumeFlags and PercentInUse bytes of sector 0 are excluded.
pub(crate) fn boot_checksum_add(mut checksum: u32, sector_index: u32, sector: &Block) -> u32 {
    for (idx, byte) in sector.iter().enumerate() {
        if sector_index == 0 && matches!(idx, 106 | 107 | 112) {
            continue;
        }
        checksum = checksum.rotate_right(1).wrapping_add(*byte as u32);
    }
    checksum
}

pub(crate) fn checksum_sector_matches(sector: &Block, checksum: u32) -> bool {
    sector
        .chunks_exact(4)
        .all(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]) == checksum)
}

/// Start sector of the first exFAT partition in an MBR.
pub(crate) fn find_exfat_partition(sector0: &Block) -> Option<u32> {
    if sector0[510] != 0x55 || sector0[511] != 0xAA {
        return None;
    }
    (0..4).find_map(|idx| {
        let entry = &sector0[446 + idx * 16..446 + (idx + 1) * 16];
        let start = read_u32(entry, 8);
        (entry[4] == MBR_TYPE_EXFAT && start != 0).then_some(start)
    })
}
