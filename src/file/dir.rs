use super::OpenFile;
use crate::{
    device::BlockDevice,
    entry::{
        decode, name::names_equal, DecodedSet, EntrySetBuf, RawEntry, ENTRY_IN_USE,
        ENTRY_TYPE_END, ENTRY_TYPE_FILE, MAX_SET_ENTRIES,
    },
    error::Error,
    volume::Volume,
    DIR_ENTRY_SIZE, SECTOR_SIZE,
};

/// Location of a directory entry: cluster, byte offset inside the cluster
/// and whether the parent directory is contiguous.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DirPos {
    pub(crate) cluster: u32,
    pub(crate) offset: u32,
    pub(crate) contiguous: bool,
}

impl DirPos {
    pub(crate) const NONE: Self = Self {
        cluster: 0,
        offset: 0,
        contiguous: false,
    };
}

/// An in-use entry set found in a directory.
#[derive(Clone, Debug)]
pub(crate) struct Found {
    pub(crate) pos: DirPos,
    pub(crate) set_count: u8,
    pub(crate) set: DecodedSet,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct DirLookup {
    pub(crate) found: Option<Found>,
    /// Start of the first free run long enough for the requested set.
    pub(crate) free: Option<DirPos>,
    /// Free run running up to the end of the directory when no run was long
    /// enough: start and length in entries.
    pub(crate) tail: Option<(DirPos, usize)>,
}

impl<D: BlockDevice> Volume<D> {
    fn dir_entry_location(&self, pos: DirPos) -> Result<(u32, usize), Error<D::Error>> {
        let lba = self.cluster_start_sector(pos.cluster)? + pos.offset / SECTOR_SIZE as u32;
        Ok((lba, pos.offset as usize % SECTOR_SIZE))
    }

    pub(crate) fn dir_pos_next(&mut self, pos: DirPos) -> Result<DirPos, Error<D::Error>> {
        let offset = pos.offset + DIR_ENTRY_SIZE as u32;
        if offset < self.bytes_per_cluster() {
            return Ok(DirPos { offset, ..pos });
        }
        let cluster = if pos.contiguous {
            pos.cluster + 1
        } else {
            self.fat_get(pos.cluster)?.ok_or(Error::Corrupt)?
        };
        Ok(DirPos {
            cluster,
            offset: 0,
            contiguous: pos.contiguous,
        })
    }

    pub(crate) fn read_dir_entry(&mut self, pos: DirPos) -> Result<RawEntry, Error<D::Error>> {
        let (lba, offset) = self.dir_entry_location(pos)?;
        let mut entry = [0u8; DIR_ENTRY_SIZE];
        entry.copy_from_slice(&self.cache_load(lba)?[offset..offset + DIR_ENTRY_SIZE]);
        Ok(entry)
    }

    pub(crate) fn write_dir_entry(&mut self, pos: DirPos, entry: &RawEntry) -> Result<(), Error<D::Error>> {
        let (lba, offset) = self.dir_entry_location(pos)?;
        self.cache_load(lba)?[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(entry);
        self.cache_store()
    }

    pub(crate) fn read_entry_set(&mut self, pos: DirPos, count: u8) -> Result<EntrySetBuf, Error<D::Error>> {
        let mut set = EntrySetBuf::new();
        let mut at = pos;
        for idx in 0..count {
            if idx > 0 {
                at = self.dir_pos_next(at)?;
            }
            let entry = self.read_dir_entry(at)?;
            set.push(entry).map_err(|_| Error::Corrupt)?;
        }
        Ok(set)
    }

    pub(crate) fn write_entry_set(&mut self, pos: DirPos, set: &[RawEntry]) -> Result<(), Error<D::Error>> {
        let mut at = pos;
        for (idx, entry) in set.iter().enumerate() {
            if idx > 0 {
                at = self.dir_pos_next(at)?;
            }
            self.write_dir_entry(at, entry)?;
        }
        Ok(())
    }

    /// Marks every entry of the set as deleted by clearing the in-use bit.
    pub(crate) fn tombstone_entry_set(&mut self, pos: DirPos, count: u8) -> Result<(), Error<D::Error>> {
        let mut at = pos;
        for idx in 0..count {
            if idx > 0 {
                at = self.dir_pos_next(at)?;
            }
            let mut entry = self.read_dir_entry(at)?;
            entry[0] &= !ENTRY_IN_USE;
            self.write_dir_entry(at, &entry)?;
        }
        Ok(())
    }
}

impl OpenFile {
    /// Reads the entry at the current position and steps past it. `None`
    /// once the directory's clusters are exhausted.
    pub(crate) fn next_dir_entry<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
    ) -> Result<Option<(DirPos, RawEntry)>, Error<D::Error>> {
        if !self.is_root() && self.cur_position >= self.data_length {
            return Ok(None);
        }
        let cluster_offset = self.cur_position & vol.cluster_mask();
        let cluster = if cluster_offset == 0 {
            match self.cluster_at_boundary(vol)? {
                Some(cluster) => cluster,
                None => return Ok(None),
            }
        } else {
            self.cur_cluster
        };
        let pos = DirPos {
            cluster,
            offset: cluster_offset as u32,
            contiguous: self.is_contiguous(),
        };
        let entry = vol.read_dir_entry(pos)?;
        self.cur_cluster = cluster;
        self.cur_position += DIR_ENTRY_SIZE as u64;
        Ok(Some((pos, entry)))
    }

    /// Collects the secondary entries following the primary `entry`.
    fn read_set_from<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        entry: &RawEntry,
    ) -> Result<EntrySetBuf, Error<D::Error>> {
        let count = entry[1] as usize + 1;
        if !(3..=MAX_SET_ENTRIES).contains(&count) {
            return Err(Error::Corrupt);
        }
        let mut set = EntrySetBuf::new();
        set.push(*entry).map_err(|_| Error::Corrupt)?;
        for _ in 1..count {
            let Some((_, next)) = self.next_dir_entry(vol)? else {
                return Err(Error::Corrupt);
            };
            set.push(next).map_err(|_| Error::Corrupt)?;
        }
        Ok(set)
    }

    /// Scans from the start of the directory for `name`. With `needed > 0`
    /// also records where a set of that many entries would fit.
    pub(crate) fn find_entry<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        name: &[u16],
        needed: usize,
    ) -> Result<DirLookup, Error<D::Error>> {
        self.rewind();
        let mut lookup = DirLookup::default();
        let mut run_start = DirPos::NONE;
        let mut run_len = 0usize;
        let mut ended = false;

        while let Some((pos, entry)) = self.next_dir_entry(vol)? {
            ended |= entry[0] == ENTRY_TYPE_END;
            if ended || entry[0] & ENTRY_IN_USE == 0 {
                if needed == 0 {
                    if ended {
                        break;
                    }
                    continue;
                }
                if run_len == 0 {
                    run_start = pos;
                }
                run_len += 1;
                if run_len >= needed && lookup.free.is_none() {
                    lookup.free = Some(run_start);
                }
                if ended && lookup.free.is_some() {
                    break;
                }
                continue;
            }

            run_len = 0;
            if entry[0] != ENTRY_TYPE_FILE {
                continue;
            }
            let raw = self.read_set_from(vol, &entry)?;
            let set = decode(&raw).inspect_err(|_| {
                log::warn!(
                    "exfat: dir_err reason=bad_entry_set cluster={} offset={}",
                    pos.cluster,
                    pos.offset
                );
            })?;
            if names_equal(&set.name, name) {
                lookup.found = Some(Found {
                    pos,
                    set_count: raw.len() as u8,
                    set,
                });
                return Ok(lookup);
            }
        }

        if lookup.free.is_none() && run_len > 0 {
            lookup.tail = Some((run_start, run_len));
        }
        Ok(lookup)
    }

    /// Next in-use entry set from the current position, `None` at the end
    /// of the directory.
    pub(crate) fn next_entry_set<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
    ) -> Result<Option<Found>, Error<D::Error>> {
        loop {
            let saved = (self.cur_position, self.cur_cluster);
            let Some((pos, entry)) = self.next_dir_entry(vol)? else {
                return Ok(None);
            };
            match entry[0] {
                ENTRY_TYPE_END => {
                    // Stay on the end marker so later calls also see it.
                    (self.cur_position, self.cur_cluster) = saved;
                    return Ok(None);
                }
                ENTRY_TYPE_FILE => {
                    let raw = self.read_set_from(vol, &entry)?;
                    let set = decode(&raw)?;
                    return Ok(Some(Found {
                        pos,
                        set_count: raw.len() as u8,
                        set,
                    }));
                }
                _ => {}
            }
        }
    }

    pub(crate) fn is_empty_dir<D: BlockDevice>(&mut self, vol: &mut Volume<D>) -> Result<bool, Error<D::Error>> {
        self.rewind();
        while let Some((_, entry)) = self.next_dir_entry(vol)? {
            match entry[0] {
                ENTRY_TYPE_END => break,
                ENTRY_TYPE_FILE => return Ok(false),
                _ => {}
            }
        }
        Ok(true)
    }

    /// Returns where a set of `needed` entries can be written, growing the
    /// directory when no free run is long enough.
    pub(crate) fn reserve_entries<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        lookup: &DirLookup,
        needed: usize,
    ) -> Result<DirPos, Error<D::Error>> {
        if let Some(pos) = lookup.free {
            return Ok(pos);
        }
        let per_cluster = (vol.bytes_per_cluster() as usize) / DIR_ENTRY_SIZE;
        let (mut start, mut have) = match lookup.tail {
            Some((pos, len)) => (Some(pos), len),
            None => (None, 0),
        };
        while have < needed {
            let added = self.add_dir_cluster(vol)?;
            start.get_or_insert(added);
            have += per_cluster;
        }
        let mut start = start.ok_or(Error::Corrupt)?;
        // Growth may have replaced the contiguous run by a FAT chain.
        start.contiguous = self.is_contiguous();
        Ok(start)
    }
}
