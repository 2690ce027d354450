mod mem;
#[cfg(feature = "sdcard")]
mod sdspi;

pub use mem::{MemDisk, MemDiskError};

use crate::Block;

/// Sector-addressed storage with a fixed 512-byte sector.
pub trait BlockDevice {
    type Error: core::fmt::Debug;

    fn read_sectors(&mut self, first_sector: u32, dst: &mut [Block]) -> Result<(), Self::Error>;

    fn write_sectors(&mut self, first_sector: u32, src: &[Block]) -> Result<(), Self::Error>;

    /// Blocks until previously written sectors are durable.
    fn sync(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn sector_count(&mut self) -> Result<u32, Self::Error>;

    fn is_busy(&mut self) -> bool {
        false
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for &mut T {
    type Error = T::Error;

    fn read_sectors(&mut self, first_sector: u32, dst: &mut [Block]) -> Result<(), Self::Error> {
        (**self).read_sectors(first_sector, dst)
    }

    fn write_sectors(&mut self, first_sector: u32, src: &[Block]) -> Result<(), Self::Error> {
        (**self).write_sectors(first_sector, src)
    }

    fn sync(&mut self) -> Result<(), Self::Error> {
        (**self).sync()
    }

    fn sector_count(&mut self) -> Result<u32, Self::Error> {
        (**self).sector_count()
    }

    fn is_busy(&mut self) -> bool {
        (**self).is_busy()
    }
}
