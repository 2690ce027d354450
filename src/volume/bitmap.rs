use super::Volume;
use crate::{device::BlockDevice, error::Error, SECTOR_SIZE};

const BITS_PER_SECTOR: u32 = (SECTOR_SIZE * 8) as u32;

impl<D: BlockDevice> Volume<D> {
    fn bitmap_location(&self, cluster: u32) -> Result<(u32, usize, u8), Error<D::Error>> {
        let bit = cluster - 2;
        let first_sector = self.cluster_start_sector(self.geometry.bitmap_first_cluster)?;
        let lba = first_sector + bit / BITS_PER_SECTOR;
        let in_sector = bit % BITS_PER_SECTOR;
        Ok((lba, (in_sector / 8) as usize, 1 << (in_sector % 8)))
    }

    fn bitmap_bit(&mut self, cluster: u32) -> Result<bool, Error<D::Error>> {
        let (lba, byte, mask) = self.bitmap_location(cluster)?;
        Ok(self.cache_load(lba)?[byte] & mask != 0)
    }

    /// First cluster of a run of `count` free clusters, searching forward
    /// from `start` and wrapping once. `start == 0` uses the volume's hint.
    /// Runs never wrap past the last cluster.
    pub fn bitmap_find(&mut self, start: u32, count: u32) -> Result<Option<u32>, Error<D::Error>> {
        let total = self.geometry.cluster_count;
        if count == 0 || count > total {
            return Ok(None);
        }
        let start = if start == 0 { self.next_free_hint } else { start };
        let start = if self.is_valid_cluster(start) { start } else { 2 };

        let mut cluster = start;
        let mut run_start = start;
        let mut run_len = 0u32;
        for _ in 0..total {
            if self.bitmap_bit(cluster)? {
                run_len = 0;
            } else {
                if run_len == 0 {
                    run_start = cluster;
                }
                run_len += 1;
                if run_len == count {
                    return Ok(Some(run_start));
                }
            }
            cluster += 1;
            if cluster > total + 1 {
                cluster = 2;
                run_len = 0;
            }
        }
        Ok(None)
    }

    /// Sets or clears the bits for `count` clusters from `start`. A bit
    /// already in the requested state means the bitmap disagrees with the
    /// directory tree and fails with `Corrupt`.
    pub fn bitmap_modify(&mut self, start: u32, count: u32, used: bool) -> Result<(), Error<D::Error>> {
        let end = start as u64 + count as u64;
        if count == 0 || !self.is_valid_cluster(start) || end > self.geometry.cluster_count as u64 + 2 {
            return Err(Error::Corrupt);
        }

        let mut cluster = start;
        while cluster < end as u32 {
            let (lba, _, _) = self.bitmap_location(cluster)?;
            let sector_end = cluster - (cluster - 2) % BITS_PER_SECTOR + BITS_PER_SECTOR;
            let stop = sector_end.min(end as u32);
            let sector = self.cache_load(lba)?;
            let mut conflict = None;
            for c in cluster..stop {
                let bit = (c - 2) % BITS_PER_SECTOR;
                let (byte, mask) = ((bit / 8) as usize, 1u8 << (bit % 8));
                if (sector[byte] & mask != 0) == used {
                    conflict = Some(c);
                    break;
                }
                if used {
                    sector[byte] |= mask;
                } else {
                    sector[byte] &= !mask;
                }
            }
            if let Some(c) = conflict {
                // Undo the partial edit of this sector.
                self.cache.invalidate();
                log::warn!("exfat: bitmap_err reason=state_conflict cluster={} used={}", c, used);
                return Err(Error::Corrupt);
            }
            self.cache_store()?;
            cluster = stop;
        }

        if used {
            if self.next_free_hint >= start && self.next_free_hint < end as u32 {
                self.next_free_hint = if end as u32 > self.geometry.cluster_count + 1 {
                    2
                } else {
                    end as u32
                };
            }
        } else if start < self.next_free_hint {
            self.next_free_hint = start;
        }
        Ok(())
    }

    /// Finds and marks one free cluster near `hint`.
    pub fn allocate_next(&mut self, hint: u32) -> Result<u32, Error<D::Error>> {
        let Some(cluster) = self.bitmap_find(hint, 1)? else {
            log::warn!("exfat: alloc_err reason=volume_full");
            return Err(Error::OutOfSpace);
        };
        self.bitmap_modify(cluster, 1, true)?;
        Ok(cluster)
    }

    pub fn free(&mut self, cluster: u32) -> Result<(), Error<D::Error>> {
        self.bitmap_modify(cluster, 1, false)
    }

    /// True when every cluster in `[start, start + count)` exists and is free.
    pub fn is_contiguous_run(&mut self, start: u32, count: u32) -> Result<bool, Error<D::Error>> {
        let end = start as u64 + count as u64;
        if !self.is_valid_cluster(start) || end > self.geometry.cluster_count as u64 + 2 {
            return Ok(false);
        }
        for cluster in start..end as u32 {
            if self.bitmap_bit(cluster)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn free_cluster_count(&mut self) -> Result<u32, Error<D::Error>> {
        let total = self.geometry.cluster_count;
        let mut free = 0u32;
        let mut cluster = 2u32;
        while cluster < total + 2 {
            let (lba, _, _) = self.bitmap_location(cluster)?;
            let stop = (cluster + BITS_PER_SECTOR).min(total + 2);
            let sector = self.cache_load(lba)?;
            for c in cluster..stop {
                let bit = (c - 2) % BITS_PER_SECTOR;
                if sector[(bit / 8) as usize] & (1 << (bit % 8)) == 0 {
                    free += 1;
                }
            }
            cluster = stop;
        }
        Ok(free)
    }
}
