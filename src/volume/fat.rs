use super::{Volume, FAT_BAD, FAT_EOC};
use crate::{device::BlockDevice, error::Error, SECTOR_SIZE};

const FAT_ENTRIES_PER_SECTOR: u32 = (SECTOR_SIZE / 4) as u32;

impl<D: BlockDevice> Volume<D> {
    fn fat_location(&self, cluster: u32) -> Result<(u32, usize), Error<D::Error>> {
        if !self.is_valid_cluster(cluster) {
            log::warn!("exfat: fat_err reason=cluster_range cluster={}", cluster);
            return Err(Error::Corrupt);
        }
        let lba = self.geometry.fat_start + cluster / FAT_ENTRIES_PER_SECTOR;
        let offset = (cluster % FAT_ENTRIES_PER_SECTOR) as usize * 4;
        Ok((lba, offset))
    }

    /// Successor of `cluster` in its chain, `None` at end of chain.
    pub fn fat_get(&mut self, cluster: u32) -> Result<Option<u32>, Error<D::Error>> {
        let (lba, offset) = self.fat_location(cluster)?;
        let sector = self.cache_load(lba)?;
        let next = u32::from_le_bytes([
            sector[offset],
            sector[offset + 1],
            sector[offset + 2],
            sector[offset + 3],
        ]);
        if next == FAT_EOC {
            return Ok(None);
        }
        if next == FAT_BAD {
            log::warn!("exfat: fat_err reason=bad_cluster_in_chain cluster={}", cluster);
            return Err(Error::Corrupt);
        }
        if !self.is_valid_cluster(next) {
            log::warn!("exfat: fat_err reason=bad_link cluster={} next={:#010x}", cluster, next);
            return Err(Error::Corrupt);
        }
        Ok(Some(next))
    }

    pub fn fat_put(&mut self, cluster: u32, value: u32) -> Result<(), Error<D::Error>> {
        let (lba, offset) = self.fat_location(cluster)?;
        let sector = self.cache_load(lba)?;
        sector[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        self.cache_store()
    }

    /// Releases every cluster of the FAT chain starting at `first`.
    pub fn free_chain(&mut self, first: u32) -> Result<(), Error<D::Error>> {
        let mut cluster = first;
        for _ in 0..self.geometry.cluster_count {
            let next = self.fat_get(cluster)?;
            self.fat_put(cluster, 0)?;
            self.free(cluster)?;
            match next {
                Some(next) => cluster = next,
                None => return Ok(()),
            }
        }
        log::warn!("exfat: fat_err reason=chain_loop first={}", first);
        Err(Error::Corrupt)
    }
}
