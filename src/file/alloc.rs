use super::{dir::DirPos, File, OpenFile, FLAG_CONTIGUOUS, WRITE_ERROR};
use crate::{
    device::BlockDevice,
    error::Error,
    volume::{Volume, FAT_EOC},
};

/// Largest directory the format allows.
const MAX_DIR_BYTES: u64 = 256 * 1024 * 1024;

impl OpenFile {
    /// Allocates one cluster after `cur_cluster` (or the first cluster when
    /// `cur_cluster` is 0) and links it. Returns the new cluster; the
    /// caller moves `cur_cluster`.
    ///
    /// A contiguous object stays contiguous while the adjacent cluster is
    /// free. Otherwise its run is written out as an explicit FAT chain.
    pub(crate) fn add_cluster<D: BlockDevice>(&mut self, vol: &mut Volume<D>) -> Result<u32, Error<D::Error>> {
        let last = self.cur_cluster;
        let cluster = if last != 0 && vol.is_contiguous_run(last + 1, 1)? {
            last + 1
        } else {
            let hint = if last != 0 { last + 1 } else { 0 };
            match vol.bitmap_find(hint, 1)? {
                Some(cluster) => cluster,
                None => {
                    log::warn!("exfat: alloc_err reason=volume_full first={}", self.first_cluster);
                    return Err(Error::OutOfSpace);
                }
            }
        };
        vol.bitmap_modify(cluster, 1, true)?;

        if last == 0 {
            self.first_cluster = cluster;
            self.flags |= FLAG_CONTIGUOUS;
        } else if self.is_contiguous() {
            if cluster != last + 1 {
                for c in self.first_cluster..last {
                    vol.fat_put(c, c + 1)?;
                }
                vol.fat_put(cluster, FAT_EOC)?;
                vol.fat_put(last, cluster)?;
                self.flags &= !FLAG_CONTIGUOUS;
                log::debug!(
                    "exfat: alloc_chain first={} last={} next={}",
                    self.first_cluster,
                    last,
                    cluster
                );
            }
        } else {
            vol.fat_put(cluster, FAT_EOC)?;
            vol.fat_put(last, cluster)?;
        }
        self.mark_dirty();
        Ok(cluster)
    }

    /// Last cluster of the object and the bytes its clusters span.
    fn chain_end<D: BlockDevice>(&self, vol: &mut Volume<D>) -> Result<(u32, u64), Error<D::Error>> {
        let cluster_bytes = vol.bytes_per_cluster() as u64;
        if self.is_contiguous() {
            let count = vol.clusters_for(self.data_length).max(1);
            return Ok((self.first_cluster + count as u32 - 1, count * cluster_bytes));
        }
        let mut cluster = self.first_cluster;
        let mut count = 1u64;
        while let Some(next) = vol.fat_get(cluster)? {
            cluster = next;
            count += 1;
            if count > vol.cluster_count() as u64 {
                return Err(Error::Corrupt);
            }
        }
        Ok((cluster, count * cluster_bytes))
    }

    /// Appends one zeroed cluster to a directory. Returns the position of
    /// its first entry.
    pub(crate) fn add_dir_cluster<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
    ) -> Result<DirPos, Error<D::Error>> {
        let cluster_bytes = vol.bytes_per_cluster() as u64;
        let (last, length) = self.chain_end(vol)?;
        if length + cluster_bytes > MAX_DIR_BYTES {
            return Err(Error::OutOfSpace);
        }
        self.cur_position = length;
        self.cur_cluster = last;
        let cluster = self.add_cluster(vol)?;
        vol.zero_cluster(cluster)?;

        if !self.is_root() {
            self.data_length += cluster_bytes;
            self.valid_length += cluster_bytes;
            self.sync(vol)?;
        }
        log::debug!("exfat: dir_grow cluster={} bytes={}", cluster, length + cluster_bytes);
        Ok(DirPos {
            cluster,
            offset: 0,
            contiguous: self.is_contiguous(),
        })
    }

    pub(crate) fn pre_allocate<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        length: u64,
    ) -> Result<(), Error<D::Error>> {
        if !self.is_file() {
            return Err(Error::WrongFileType);
        }
        if !self.is_writable() {
            return Err(Error::AccessDenied);
        }
        if length == 0 || self.first_cluster != 0 || self.data_length != 0 {
            return Err(Error::InvalidArgument);
        }
        let count = vol.clusters_for(length);
        if count > vol.cluster_count() as u64 {
            return Err(Error::OutOfSpace);
        }
        let Some(start) = vol.bitmap_find(0, count as u32)? else {
            log::warn!("exfat: prealloc_err reason=no_run clusters={}", count);
            return Err(Error::OutOfSpace);
        };
        vol.bitmap_modify(start, count as u32, true)?;

        self.first_cluster = start;
        self.data_length = length;
        self.flags |= FLAG_CONTIGUOUS;
        self.mark_dirty();
        self.rewind();
        self.sync(vol)
    }

    /// Cuts the file at the current position and releases the clusters
    /// past it.
    pub(crate) fn truncate<D: BlockDevice>(&mut self, vol: &mut Volume<D>) -> Result<(), Error<D::Error>> {
        if !self.is_file() {
            return Err(Error::WrongFileType);
        }
        if !self.is_writable() {
            return Err(Error::AccessDenied);
        }
        self.fill_gap(vol)?;
        if self.first_cluster == 0 {
            return Ok(());
        }

        let keep = if self.cur_position == 0 {
            0
        } else {
            ((self.cur_position - 1) >> vol.cluster_shift()) + 1
        };
        if self.is_contiguous() {
            let allocated = vol.clusters_for(self.data_length).max(1);
            if allocated > keep {
                vol.bitmap_modify(
                    self.first_cluster + keep as u32,
                    (allocated - keep) as u32,
                    false,
                )?;
            }
        } else if self.cur_cluster != 0 {
            if let Some(next) = vol.fat_get(self.cur_cluster)? {
                vol.fat_put(self.cur_cluster, FAT_EOC)?;
                vol.free_chain(next)?;
            }
        } else {
            vol.free_chain(self.first_cluster)?;
        }

        if keep == 0 {
            self.first_cluster = 0;
            self.flags &= !FLAG_CONTIGUOUS;
        }
        self.data_length = self.cur_position;
        self.valid_length = self.cur_position;
        self.mark_dirty();
        self.sync(vol)
    }
}

impl File {
    /// Reserves `length` bytes of contiguous space for an empty file. The
    /// reserved bytes read as zero until written.
    pub fn pre_allocate<D: BlockDevice>(&mut self, vol: &mut Volume<D>, length: u64) -> Result<(), Error<D::Error>> {
        self.with_state(WRITE_ERROR, |state| state.pre_allocate(vol, length))
    }

    /// Truncates at the current position.
    pub fn truncate<D: BlockDevice>(&mut self, vol: &mut Volume<D>) -> Result<(), Error<D::Error>> {
        self.with_state(WRITE_ERROR, |state| state.truncate(vol))
    }

    pub fn truncate_to<D: BlockDevice>(&mut self, vol: &mut Volume<D>, length: u64) -> Result<(), Error<D::Error>> {
        self.with_state(WRITE_ERROR, |state| {
            state.seek_set(vol, length)?;
            state.truncate(vol)
        })
    }
}
