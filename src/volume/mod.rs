//! Mounted exFAT volume: geometry, FAT, allocation bitmap and the shared
//! sector cache.

mod bitmap;
mod boot;
mod cache;
mod fat;
pub mod format;

use crate::{
    config::VolumeConfig,
    device::BlockDevice,
    entry::{read_u32, read_u64, time::DateTime, ENTRY_TYPE_BITMAP, ENTRY_TYPE_END, ENTRY_TYPE_UPCASE},
    error::Error,
    Block, DIR_ENTRY_SIZE, SECTOR_SIZE,
};
use boot::{
    boot_checksum_add, checksum_sector_matches, find_exfat_partition, is_exfat_boot_sector,
    parse_boot_sector, CHECKSUM_SECTOR,
};
use cache::SectorCache;

pub(crate) const FAT_EOC: u32 = 0xFFFF_FFFF;
pub(crate) const FAT_BAD: u32 = 0xFFFF_FFF7;
pub(crate) const FAT_MEDIA: u32 = 0xFFFF_FFF8;

/// Partition constants read at mount.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub partition_start: u32,
    pub volume_length: u64,
    pub fat_start: u32,
    pub fat_length: u32,
    pub cluster_heap_start: u32,
    pub cluster_count: u32,
    pub root_cluster: u32,
    pub sectors_per_cluster_shift: u8,
    pub serial: u32,
    pub bitmap_first_cluster: u32,
    pub bitmap_length: u64,
    pub upcase_first_cluster: u32,
    pub upcase_length: u64,
    pub upcase_checksum: u32,
}

pub struct Volume<D: BlockDevice> {
    pub(crate) device: D,
    pub(crate) cache: SectorCache,
    pub(crate) geometry: Geometry,
    pub(crate) config: VolumeConfig,
    /// Bitmap search starts here when the caller gives no hint.
    pub(crate) next_free_hint: u32,
}

impl<D: BlockDevice> Volume<D> {
    pub fn mount(mut device: D, config: VolumeConfig) -> Result<Self, Error<D::Error>> {
        let mut sector = [0u8; SECTOR_SIZE];
        device
            .read_sectors(0, core::slice::from_mut(&mut sector))
            .map_err(Error::Io)?;

        let partition_start = if is_exfat_boot_sector(&sector) {
            0
        } else {
            let Some(start) = find_exfat_partition(&sector) else {
                log::warn!("exfat: mount_err reason=no_exfat_partition");
                return Err(Error::Corrupt);
            };
            device
                .read_sectors(start, core::slice::from_mut(&mut sector))
                .map_err(Error::Io)?;
            start
        };

        let params = parse_boot_sector(&sector, partition_start).inspect_err(|_| {
            log::warn!("exfat: mount_err reason=boot_sector lba={}", partition_start);
        })?;

        let mut checksum = 0u32;
        for idx in 0..CHECKSUM_SECTOR {
            device
                .read_sectors(partition_start + idx, core::slice::from_mut(&mut sector))
                .map_err(Error::Io)?;
            checksum = boot_checksum_add(checksum, idx, &sector);
        }
        device
            .read_sectors(
                partition_start + CHECKSUM_SECTOR,
                core::slice::from_mut(&mut sector),
            )
            .map_err(Error::Io)?;
        if !checksum_sector_matches(&sector, checksum) {
            log::warn!("exfat: mount_err reason=boot_checksum expected={:#010x}", checksum);
            return Err(Error::Corrupt);
        }

        let mut volume = Self {
            device,
            cache: SectorCache::new(),
            geometry: Geometry {
                partition_start,
                volume_length: params.volume_length,
                fat_start: partition_start + params.fat_offset,
                fat_length: params.fat_length,
                cluster_heap_start: partition_start + params.cluster_heap_offset,
                cluster_count: params.cluster_count,
                root_cluster: params.root_cluster,
                sectors_per_cluster_shift: params.sectors_per_cluster_shift,
                serial: params.serial,
                bitmap_first_cluster: 0,
                bitmap_length: 0,
                upcase_first_cluster: 0,
                upcase_length: 0,
                upcase_checksum: 0,
            },
            config,
            next_free_hint: 2,
        };
        volume.scan_root_metadata()?;
        log::debug!(
            "exfat: mount_ok start={} clusters={} cluster_bytes={} root={} bitmap={} serial={:#010x}",
            volume.geometry.partition_start,
            volume.geometry.cluster_count,
            volume.bytes_per_cluster(),
            volume.geometry.root_cluster,
            volume.geometry.bitmap_first_cluster,
            volume.geometry.serial
        );
        Ok(volume)
    }

    /// Finds the allocation bitmap and upcase table entries in the root
    /// directory.
    fn scan_root_metadata(&mut self) -> Result<(), Error<D::Error>> {
        let entries_per_cluster = self.bytes_per_cluster() / DIR_ENTRY_SIZE as u32;
        let mut cluster = self.geometry.root_cluster;
        let mut visited = 0u32;
        'chain: loop {
            for idx in 0..entries_per_cluster {
                let byte = idx as usize * DIR_ENTRY_SIZE;
                let lba = self.cluster_start_sector(cluster)? + (byte / SECTOR_SIZE) as u32;
                let offset = byte % SECTOR_SIZE;
                let mut entry = [0u8; DIR_ENTRY_SIZE];
                entry.copy_from_slice(&self.cache_load(lba)?[offset..offset + DIR_ENTRY_SIZE]);
                match entry[0] {
                    ENTRY_TYPE_END => break 'chain,
                    // Second bitmap (bit0 set) only exists on TexFAT volumes.
                    ENTRY_TYPE_BITMAP if entry[1] & 0x01 == 0 => {
                        self.geometry.bitmap_first_cluster = read_u32(&entry, 20);
                        self.geometry.bitmap_length = read_u64(&entry, 24);
                    }
                    ENTRY_TYPE_UPCASE => {
                        self.geometry.upcase_checksum = read_u32(&entry, 4);
                        self.geometry.upcase_first_cluster = read_u32(&entry, 20);
                        self.geometry.upcase_length = read_u64(&entry, 24);
                    }
                    _ => {}
                }
            }
            visited += 1;
            match self.fat_get(cluster)? {
                Some(next) if visited < self.geometry.cluster_count => cluster = next,
                Some(_) => return Err(Error::Corrupt),
                None => break,
            }
        }

        let needed = (self.geometry.cluster_count as u64).div_ceil(8);
        if self.geometry.bitmap_first_cluster < 2 || self.geometry.bitmap_length < needed {
            log::warn!("exfat: mount_err reason=no_bitmap");
            return Err(Error::Corrupt);
        }
        Ok(())
    }

    /// Syncs the device and hands it back.
    pub fn unmount(mut self) -> Result<D, Error<D::Error>> {
        self.device.sync().map_err(Error::Io)?;
        Ok(self.device)
    }

    pub fn sync(&mut self) -> Result<(), Error<D::Error>> {
        self.device.sync().map_err(Error::Io)
    }

    pub fn device(&mut self) -> &mut D {
        self.cache.invalidate();
        &mut self.device
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    pub fn cluster_count(&self) -> u32 {
        self.geometry.cluster_count
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        1 << self.geometry.sectors_per_cluster_shift
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        (SECTOR_SIZE as u32) << self.geometry.sectors_per_cluster_shift
    }

    pub fn root_directory_cluster(&self) -> u32 {
        self.geometry.root_cluster
    }

    pub fn volume_serial(&self) -> u32 {
        self.geometry.serial
    }

    pub(crate) fn cluster_shift(&self) -> u32 {
        9 + self.geometry.sectors_per_cluster_shift as u32
    }

    pub(crate) fn cluster_mask(&self) -> u64 {
        self.bytes_per_cluster() as u64 - 1
    }

    /// Clusters needed to hold `length` bytes.
    pub(crate) fn clusters_for(&self, length: u64) -> u64 {
        length.div_ceil(self.bytes_per_cluster() as u64)
    }

    pub(crate) fn is_valid_cluster(&self, cluster: u32) -> bool {
        cluster >= 2 && cluster <= self.geometry.cluster_count + 1
    }

    pub(crate) fn cluster_start_sector(&self, cluster: u32) -> Result<u32, Error<D::Error>> {
        if !self.is_valid_cluster(cluster) {
            log::warn!("exfat: bad_cluster cluster={}", cluster);
            return Err(Error::Corrupt);
        }
        // Mount rejects any heap whose end does not fit in a u32 LBA.
        Ok(self.geometry.cluster_heap_start
            + ((cluster - 2) << self.geometry.sectors_per_cluster_shift))
    }

    pub(crate) fn now(&self) -> DateTime {
        (self.config.time_source)()
    }

    pub(crate) fn cache_load(&mut self, lba: u32) -> Result<&mut Block, Error<D::Error>> {
        self.cache.load(&mut self.device, lba).map_err(Error::Io)
    }

    pub(crate) fn cache_store(&mut self) -> Result<(), Error<D::Error>> {
        self.cache.store(&mut self.device).map_err(Error::Io)
    }

    pub(crate) fn read_sector(&mut self, lba: u32, out: &mut Block) -> Result<(), Error<D::Error>> {
        self.device
            .read_sectors(lba, core::slice::from_mut(out))
            .map_err(Error::Io)
    }

    pub(crate) fn write_sector(&mut self, lba: u32, data: &Block) -> Result<(), Error<D::Error>> {
        self.cache.note_write(lba, data);
        self.device
            .write_sectors(lba, core::slice::from_ref(data))
            .map_err(|err| {
                self.cache.invalidate();
                Error::Io(err)
            })
    }

    /// Zeroes every sector of `cluster`.
    pub(crate) fn zero_cluster(&mut self, cluster: u32) -> Result<(), Error<D::Error>> {
        let first = self.cluster_start_sector(cluster)?;
        let zero = [0u8; SECTOR_SIZE];
        for idx in 0..self.sectors_per_cluster() {
            self.write_sector(first + idx, &zero)?;
        }
        Ok(())
    }
}
