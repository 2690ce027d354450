use super::{
    boot::{boot_checksum_add, BOOT_REGION_SECTORS, CHECKSUM_SECTOR, EXFAT_OEM_NAME},
    FAT_EOC, FAT_MEDIA,
};
use crate::{
    device::BlockDevice,
    entry::{write_u16, write_u32, write_u64, ENTRY_TYPE_BITMAP, ENTRY_TYPE_LABEL, ENTRY_TYPE_UPCASE},
    error::Error,
    Block, DIR_ENTRY_SIZE, SECTOR_SIZE,
};

const FAT_OFFSET: u32 = 24;
const UPCASE_ENTRIES: usize = 128;
const LABEL_MAX_UNITS: usize = 11;
const MIN_CLUSTERS: u32 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatOptions<'a> {
    /// Power of two between 1 and 65536.
    pub sectors_per_cluster: u32,
    pub volume_serial: u32,
    pub label: Option<&'a str>,
}

impl Default for FormatOptions<'_> {
    fn default() -> Self {
        Self {
            sectors_per_cluster: 8,
            volume_serial: 0x1234_5678,
            label: None,
        }
    }
}

/// Layout computed from the device size.
#[derive(Clone, Copy, Debug)]
struct Layout {
    volume_length: u32,
    fat_length: u32,
    heap_offset: u32,
    cluster_count: u32,
    spc_shift: u8,
    bitmap_bytes: u32,
    bitmap_clusters: u32,
    upcase_cluster: u32,
    root_cluster: u32,
}

impl Layout {
    fn compute(volume_length: u32, sectors_per_cluster: u32) -> Option<Self> {
        if !sectors_per_cluster.is_power_of_two() || sectors_per_cluster > 1 << 16 {
            return None;
        }
        let spc_shift = sectors_per_cluster.trailing_zeros() as u8;
        let mut cluster_count = volume_length.checked_sub(FAT_OFFSET)? / sectors_per_cluster;
        let (fat_length, heap_offset) = loop {
            let fat_length = (cluster_count + 2).div_ceil((SECTOR_SIZE / 4) as u32);
            let heap_offset = (FAT_OFFSET + fat_length).next_multiple_of(sectors_per_cluster);
            let fits = volume_length.checked_sub(heap_offset)? / sectors_per_cluster;
            if fits >= cluster_count {
                break (fat_length, heap_offset);
            }
            cluster_count = fits;
        };

        let cluster_bytes = (SECTOR_SIZE as u32) << spc_shift;
        let bitmap_bytes = cluster_count.div_ceil(8);
        let bitmap_clusters = bitmap_bytes.div_ceil(cluster_bytes);
        let upcase_cluster = 2 + bitmap_clusters;
        let root_cluster = upcase_cluster + 1;
        if cluster_count < MIN_CLUSTERS || root_cluster > cluster_count + 1 {
            return None;
        }
        Some(Self {
            volume_length,
            fat_length,
            heap_offset,
            cluster_count,
            spc_shift,
            bitmap_bytes,
            bitmap_clusters,
            upcase_cluster,
            root_cluster,
        })
    }

    fn cluster_sector(&self, cluster: u32) -> u32 {
        self.heap_offset + ((cluster - 2) << self.spc_shift)
    }

    fn sectors_per_cluster(&self) -> u32 {
        1 << self.spc_shift
    }
}

/// Writes an empty exFAT volume over the whole device.
pub fn format<D: BlockDevice>(device: &mut D, options: &FormatOptions<'_>) -> Result<(), Error<D::Error>> {
    let total = device.sector_count().map_err(Error::Io)?;
    let Some(layout) = Layout::compute(total, options.sectors_per_cluster) else {
        log::warn!(
            "exfat: format_err sectors={} spc={}",
            total,
            options.sectors_per_cluster
        );
        return Err(Error::InvalidArgument);
    };
    let mut label = heapless::Vec::<u16, LABEL_MAX_UNITS>::new();
    for unit in options.label.unwrap_or("").encode_utf16() {
        label.push(unit).map_err(|_| Error::InvalidArgument)?;
    }

    write_boot_regions(device, &layout, options.volume_serial)?;
    write_fat(device, &layout)?;
    write_bitmap(device, &layout)?;
    let upcase_checksum = write_upcase(device, &layout)?;
    write_root(device, &layout, upcase_checksum, &label)?;
    device.sync().map_err(Error::Io)?;

    log::debug!(
        "exfat: format_ok sectors={} clusters={} spc={} fat_len={} heap={}",
        layout.volume_length,
        layout.cluster_count,
        layout.sectors_per_cluster(),
        layout.fat_length,
        layout.heap_offset
    );
    Ok(())
}

fn put<D: BlockDevice>(device: &mut D, lba: u32, sector: &Block) -> Result<(), Error<D::Error>> {
    device
        .write_sectors(lba, core::slice::from_ref(sector))
        .map_err(Error::Io)
}

fn boot_sector(layout: &Layout, serial: u32) -> Block {
    let mut sector = [0u8; SECTOR_SIZE];
    sector[0..3].copy_from_slice(&[0xEB, 0x76, 0x90]);
    sector[3..11].copy_from_slice(EXFAT_OEM_NAME);
    write_u64(&mut sector, 72, layout.volume_length as u64);
    write_u32(&mut sector, 80, FAT_OFFSET);
    write_u32(&mut sector, 84, layout.fat_length);
    write_u32(&mut sector, 88, layout.heap_offset);
    write_u32(&mut sector, 92, layout.cluster_count);
    write_u32(&mut sector, 96, layout.root_cluster);
    write_u32(&mut sector, 100, serial);
    write_u16(&mut sector, 104, 0x0100);
    sector[108] = 9;
    sector[109] = layout.spc_shift;
    sector[110] = 1;
    sector[111] = 0x80;
    sector[510] = 0x55;
    sector[511] = 0xAA;
    sector
}

fn write_boot_regions<D: BlockDevice>(
    device: &mut D,
    layout: &Layout,
    serial: u32,
) -> Result<(), Error<D::Error>> {
    let boot = boot_sector(layout, serial);
    let mut extended = [0u8; SECTOR_SIZE];
    extended[510] = 0x55;
    extended[511] = 0xAA;
    let blank = [0u8; SECTOR_SIZE];

    let region = |idx: u32| match idx {
        0 => &boot,
        1..=8 => &extended,
        _ => &blank,
    };
    let checksum = (0..CHECKSUM_SECTOR).fold(0u32, |sum, idx| boot_checksum_add(sum, idx, region(idx)));
    let mut checksum_sector = [0u8; SECTOR_SIZE];
    for word in checksum_sector.chunks_exact_mut(4) {
        word.copy_from_slice(&checksum.to_le_bytes());
    }

    for base in [0, BOOT_REGION_SECTORS] {
        for idx in 0..CHECKSUM_SECTOR {
            put(device, base + idx, region(idx))?;
        }
        put(device, base + CHECKSUM_SECTOR, &checksum_sector)?;
    }
    for lba in 2 * BOOT_REGION_SECTORS..FAT_OFFSET {
        put(device, lba, &blank)?;
    }
    log::debug!("exfat: format_boot checksum={:#010x}", checksum);
    Ok(())
}

fn write_fat<D: BlockDevice>(device: &mut D, layout: &Layout) -> Result<(), Error<D::Error>> {
    let entry_for = |cluster: u32| -> u32 {
        match cluster {
            0 => FAT_MEDIA,
            1 => FAT_EOC,
            c if c < layout.upcase_cluster - 1 => c + 1,
            c if c <= layout.root_cluster => FAT_EOC,
            _ => 0,
        }
    };
    let per_sector = (SECTOR_SIZE / 4) as u32;
    for idx in 0..layout.fat_length {
        let mut sector = [0u8; SECTOR_SIZE];
        let first = idx * per_sector;
        if first <= layout.root_cluster {
            for (slot, word) in sector.chunks_exact_mut(4).enumerate() {
                word.copy_from_slice(&entry_for(first + slot as u32).to_le_bytes());
            }
        }
        put(device, FAT_OFFSET + idx, &sector)?;
    }
    Ok(())
}

fn write_bitmap<D: BlockDevice>(device: &mut D, layout: &Layout) -> Result<(), Error<D::Error>> {
    let used_bits = layout.root_cluster - 1;
    let sectors = layout.bitmap_clusters << layout.spc_shift;
    let first = layout.cluster_sector(2);
    for idx in 0..sectors {
        let mut sector = [0u8; SECTOR_SIZE];
        let base_bit = idx * (SECTOR_SIZE as u32) * 8;
        for bit in base_bit..used_bits.max(base_bit) {
            let local = bit - base_bit;
            if local >= (SECTOR_SIZE * 8) as u32 {
                break;
            }
            sector[(local / 8) as usize] |= 1 << (local % 8);
        }
        put(device, first + idx, &sector)?;
    }
    Ok(())
}

/// Writes an ASCII-only upcase table and returns its checksum.
fn write_upcase<D: BlockDevice>(device: &mut D, layout: &Layout) -> Result<u32, Error<D::Error>> {
    let mut sector = [0u8; SECTOR_SIZE];
    let mut checksum = 0u32;
    for unit in 0..UPCASE_ENTRIES {
        let upper = (unit as u8).to_ascii_uppercase() as u16;
        let bytes = upper.to_le_bytes();
        sector[unit * 2..unit * 2 + 2].copy_from_slice(&bytes);
        for byte in bytes {
            checksum = checksum.rotate_right(1).wrapping_add(byte as u32);
        }
    }
    let first = layout.cluster_sector(layout.upcase_cluster);
    put(device, first, &sector)?;
    let blank = [0u8; SECTOR_SIZE];
    for idx in 1..layout.sectors_per_cluster() {
        put(device, first + idx, &blank)?;
    }
    Ok(checksum)
}

fn write_root<D: BlockDevice>(
    device: &mut D,
    layout: &Layout,
    upcase_checksum: u32,
    label: &[u16],
) -> Result<(), Error<D::Error>> {
    let mut sector = [0u8; SECTOR_SIZE];

    let entry = &mut sector[0..DIR_ENTRY_SIZE];
    entry[0] = ENTRY_TYPE_LABEL;
    entry[1] = label.len() as u8;
    for (idx, unit) in label.iter().enumerate() {
        write_u16(entry, 2 + idx * 2, *unit);
    }

    let entry = &mut sector[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE];
    entry[0] = ENTRY_TYPE_BITMAP;
    write_u32(entry, 20, 2);
    write_u64(entry, 24, layout.bitmap_bytes as u64);

    let entry = &mut sector[2 * DIR_ENTRY_SIZE..3 * DIR_ENTRY_SIZE];
    entry[0] = ENTRY_TYPE_UPCASE;
    write_u32(entry, 4, upcase_checksum);
    write_u32(entry, 20, layout.upcase_cluster);
    write_u64(entry, 24, (UPCASE_ENTRIES * 2) as u64);

    let first = layout.cluster_sector(layout.root_cluster);
    put(device, first, &sector)?;
    let blank = [0u8; SECTOR_SIZE];
    for idx in 1..layout.sectors_per_cluster() {
        put(device, first + idx, &blank)?;
    }
    Ok(())
}
