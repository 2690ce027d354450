use super::BlockDevice;
use crate::{Block, SECTOR_SIZE};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemDiskError {
    OutOfRange { sector: u32 },
}

/// RAM-backed device over a caller-owned byte slice.
///
/// Trailing bytes that do not fill a whole sector are never addressed.
pub struct MemDisk<'a> {
    data: &'a mut [u8],
}

impl<'a> MemDisk<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.data
    }

    fn range(&self, first_sector: u32, count: usize) -> Result<core::ops::Range<usize>, MemDiskError> {
        let out_of_range = MemDiskError::OutOfRange {
            sector: first_sector,
        };
        let start = (first_sector as usize)
            .checked_mul(SECTOR_SIZE)
            .ok_or(out_of_range)?;
        let end = count
            .checked_mul(SECTOR_SIZE)
            .and_then(|len| start.checked_add(len))
            .ok_or(out_of_range)?;
        if end > self.data.len() - self.data.len() % SECTOR_SIZE {
            return Err(out_of_range);
        }
        Ok(start..end)
    }
}

impl BlockDevice for MemDisk<'_> {
    type Error = MemDiskError;

    fn read_sectors(&mut self, first_sector: u32, dst: &mut [Block]) -> Result<(), Self::Error> {
        let range = self.range(first_sector, dst.len())?;
        for (block, chunk) in dst.iter_mut().zip(self.data[range].chunks_exact(SECTOR_SIZE)) {
            block.copy_from_slice(chunk);
        }
        Ok(())
    }

    fn write_sectors(&mut self, first_sector: u32, src: &[Block]) -> Result<(), Self::Error> {
        let range = self.range(first_sector, src.len())?;
        for (block, chunk) in src.iter().zip(self.data[range].chunks_exact_mut(SECTOR_SIZE)) {
            chunk.copy_from_slice(block);
        }
        Ok(())
    }

    fn sector_count(&mut self) -> Result<u32, Self::Error> {
        Ok((self.data.len() / SECTOR_SIZE) as u32)
    }
}
