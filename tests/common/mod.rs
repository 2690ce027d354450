//! Shared setup: freshly formatted RAM disks and a device that fails on
//! demand.

#![allow(dead_code)]

use exfatfs::{format, Block, BlockDevice, DateTime, FormatOptions, MemDisk, MemDiskError, Volume, VolumeConfig};

pub const DISK_SECTORS: usize = 8192;

pub fn fixed_time() -> DateTime {
    DateTime::new(2023, 11, 5, 8, 15, 30)
}

pub fn config() -> VolumeConfig {
    VolumeConfig::new().with_time_source(fixed_time)
}

/// Backing bytes of a volume formatted with `sectors_per_cluster`.
pub fn formatted(sectors_per_cluster: u32) -> Vec<u8> {
    let mut backing = vec![0u8; DISK_SECTORS * exfatfs::SECTOR_SIZE];
    let options = FormatOptions {
        sectors_per_cluster,
        volume_serial: 0x0BAD_CAFE,
        label: Some("ITEST"),
    };
    format(&mut MemDisk::new(&mut backing), &options).expect("format");
    backing
}

pub fn mount(backing: &mut [u8]) -> Volume<MemDisk<'_>> {
    Volume::mount(MemDisk::new(backing), config()).expect("mount")
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultError {
    Injected,
    Disk(MemDiskError),
}

/// `MemDisk` wrapper that starts failing reads or writes once armed.
pub struct FaultyDisk<'a> {
    inner: MemDisk<'a>,
    /// Successful reads left before every read fails; `None` never fails.
    pub reads_left: Option<u32>,
    pub fail_writes: bool,
}

impl<'a> FaultyDisk<'a> {
    pub fn new(backing: &'a mut [u8]) -> Self {
        Self {
            inner: MemDisk::new(backing),
            reads_left: None,
            fail_writes: false,
        }
    }

    pub fn heal(&mut self) {
        self.reads_left = None;
        self.fail_writes = false;
    }
}

impl BlockDevice for FaultyDisk<'_> {
    type Error = FaultError;

    fn read_sectors(&mut self, first_sector: u32, dst: &mut [Block]) -> Result<(), Self::Error> {
        match self.reads_left {
            Some(0) => return Err(FaultError::Injected),
            Some(left) => self.reads_left = Some(left - 1),
            None => {}
        }
        self.inner.read_sectors(first_sector, dst).map_err(FaultError::Disk)
    }

    fn write_sectors(&mut self, first_sector: u32, src: &[Block]) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(FaultError::Injected);
        }
        self.inner.write_sectors(first_sector, src).map_err(FaultError::Disk)
    }

    fn sector_count(&mut self) -> Result<u32, Self::Error> {
        self.inner.sector_count().map_err(FaultError::Disk)
    }
}
