use crate::{device::BlockDevice, Block, SECTOR_SIZE};

/// One-sector write-through cache.
///
/// The device always holds the latest contents of the cached sector, so the
/// cache can be dropped at any time without losing data.
pub(crate) struct SectorCache {
    lba: Option<u32>,
    data: Block,
}

impl SectorCache {
    pub(crate) const fn new() -> Self {
        Self {
            lba: None,
            data: [0; SECTOR_SIZE],
        }
    }

    pub(crate) fn load<D: BlockDevice>(
        &mut self,
        device: &mut D,
        lba: u32,
    ) -> Result<&mut Block, D::Error> {
        if self.lba != Some(lba) {
            self.lba = None;
            device.read_sectors(lba, core::slice::from_mut(&mut self.data))?;
            self.lba = Some(lba);
        }
        Ok(&mut self.data)
    }

    /// Writes the cached sector back to the device.
    pub(crate) fn store<D: BlockDevice>(&mut self, device: &mut D) -> Result<(), D::Error> {
        let Some(lba) = self.lba else {
            return Ok(());
        };
        if let Err(err) = device.write_sectors(lba, core::slice::from_ref(&self.data)) {
            self.lba = None;
            return Err(err);
        }
        Ok(())
    }

    /// Keeps the cache coherent with a sector written around it.
    pub(crate) fn note_write(&mut self, lba: u32, data: &Block) {
        if self.lba == Some(lba) {
            self.data.copy_from_slice(data);
        }
    }

    pub(crate) fn invalidate(&mut self) {
        self.lba = None;
    }
}
