use super::{File, FileAttributes, Handle, OpenFile, OpenFlags, FLAG_DIRTY, FLAG_WRITE, WRITE_ERROR};
use crate::{
    device::BlockDevice,
    entry::{decode, encode, name::decode_name, time::DateTime, EntryMeta},
    error::Error,
    volume::Volume,
};

impl OpenFile {
    /// Rewrites the directory entry set from the handle's state. `edit`
    /// runs last and may override any field.
    fn write_meta<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        touch: bool,
        edit: impl FnOnce(&mut EntryMeta),
    ) -> Result<(), Error<D::Error>> {
        let raw = vol.read_entry_set(self.dir_pos, self.set_count)?;
        let decoded = decode(&raw)?;
        let mut meta = decoded.meta;
        meta.attributes = self.attributes.to_disk();
        meta.first_cluster = self.first_cluster;
        meta.data_length = self.data_length;
        meta.valid_length = self.valid_length;
        meta.contiguous = self.is_contiguous();
        if touch {
            let now = vol.now();
            meta.modify_time = now;
            meta.access_time = now;
        }
        edit(&mut meta);

        let set = encode(&meta, &decoded.name)?;
        vol.write_entry_set(self.dir_pos, &set)?;
        self.flags &= !FLAG_DIRTY;
        Ok(())
    }

    pub(crate) fn sync<D: BlockDevice>(&mut self, vol: &mut Volume<D>) -> Result<(), Error<D::Error>> {
        if self.flags & FLAG_DIRTY != 0 && !self.is_root() {
            self.write_meta(vol, true, |_| {})?;
            log::debug!(
                "exfat: sync_entry cluster={} offset={} valid={} data={}",
                self.dir_pos.cluster,
                self.dir_pos.offset,
                self.valid_length,
                self.data_length
            );
        }
        vol.sync()
    }

    /// Deletes the entry set first, then releases the clusters. A crash in
    /// between leaks clusters instead of leaving an entry over free space.
    fn remove<D: BlockDevice>(&mut self, vol: &mut Volume<D>) -> Result<(), Error<D::Error>> {
        if self.is_root() {
            return Err(Error::WrongFileType);
        }
        if !self.is_writable() {
            return Err(Error::AccessDenied);
        }
        vol.tombstone_entry_set(self.dir_pos, self.set_count)?;
        if self.first_cluster != 0 {
            if self.is_contiguous() {
                let count = vol.clusters_for(self.data_length).max(1);
                vol.bitmap_modify(self.first_cluster, count as u32, false)?;
            } else {
                vol.free_chain(self.first_cluster)?;
            }
        }
        log::debug!(
            "exfat: remove first={} data={} entries={}",
            self.first_cluster,
            self.data_length,
            self.set_count
        );
        vol.sync()
    }
}

impl File {
    /// Writes pending metadata to the directory entry and flushes the device.
    pub fn sync<D: BlockDevice>(&mut self, vol: &mut Volume<D>) -> Result<(), Error<D::Error>> {
        self.with_state(WRITE_ERROR, |state| state.sync(vol))
    }

    /// Same as [`File::sync`].
    pub fn flush<D: BlockDevice>(&mut self, vol: &mut Volume<D>) -> Result<(), Error<D::Error>> {
        self.sync(vol)
    }

    /// Syncs and closes. The handle is closed even when the sync fails.
    pub fn close<D: BlockDevice>(&mut self, vol: &mut Volume<D>) -> Result<(), Error<D::Error>> {
        let result = self.with_state(WRITE_ERROR, |state| state.sync(vol));
        self.handle = Handle::Closed;
        result
    }

    /// Deletes an open file and closes the handle. The handle must be
    /// writable.
    pub fn remove<D: BlockDevice>(&mut self, vol: &mut Volume<D>) -> Result<(), Error<D::Error>> {
        self.with_state(WRITE_ERROR, |state| state.remove(vol))?;
        self.handle = Handle::Closed;
        Ok(())
    }

    /// Deletes an open, empty subdirectory and closes the handle.
    pub fn rmdir<D: BlockDevice>(&mut self, vol: &mut Volume<D>) -> Result<(), Error<D::Error>> {
        self.with_state(WRITE_ERROR, |state| {
            if state.is_root() || !state.is_dir() {
                return Err(Error::WrongFileType);
            }
            if !state.is_empty_dir(vol)? {
                return Err(Error::NotEmpty);
            }
            state.flags |= FLAG_WRITE;
            state.remove(vol)
        })?;
        self.handle = Handle::Closed;
        Ok(())
    }

    /// Moves this file or subdirectory to `new_path`, resolved against
    /// `dir`. Data and creation time are kept; the target must not exist.
    pub fn rename<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        dir: &mut File,
        new_path: &str,
    ) -> Result<(), Error<D::Error>> {
        let current = *self.state()?;
        if current.is_root() {
            return Err(Error::WrongFileType);
        }
        let mut target = File::new();
        target.open(vol, dir, new_path, OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::EXCL)?;
        let created = *target.state()?;

        self.with_state(WRITE_ERROR, |state| {
            let (old_pos, old_count) = (state.dir_pos, state.set_count);
            let old = decode(&vol.read_entry_set(old_pos, old_count)?)?.meta;
            let touch = state.flags & FLAG_DIRTY != 0;

            state.dir_pos = created.dir_pos;
            state.set_count = created.set_count;
            let moved = state.write_meta(vol, touch, |meta| {
                meta.create_time = old.create_time;
                if !touch {
                    meta.modify_time = old.modify_time;
                    meta.access_time = old.access_time;
                }
            });
            if let Err(err) = moved {
                state.dir_pos = old_pos;
                state.set_count = old_count;
                return Err(err);
            }
            vol.tombstone_entry_set(old_pos, old_count)?;
            log::debug!(
                "exfat: rename from_cluster={} from_offset={} to_cluster={} to_offset={}",
                old_pos.cluster,
                old_pos.offset,
                created.dir_pos.cluster,
                created.dir_pos.offset
            );
            vol.sync()
        })
    }

    /// Copies the name as UTF-8 into `out` and returns its length. The
    /// root directory is named `/`.
    pub fn get_name<D: BlockDevice>(&self, vol: &mut Volume<D>, out: &mut [u8]) -> Result<usize, Error<D::Error>> {
        let state = self.state()?;
        if state.is_root() {
            return match out.first_mut() {
                Some(byte) => {
                    *byte = b'/';
                    Ok(1)
                }
                None => Ok(0),
            };
        }
        let raw = vol.read_entry_set(state.dir_pos, state.set_count)?;
        let set = decode(&raw)?;
        Ok(decode_name(&set.name, out))
    }

    /// Metadata as stored in the directory entry set.
    pub fn dir_entry<D: BlockDevice>(&self, vol: &mut Volume<D>) -> Result<EntryMeta, Error<D::Error>> {
        let state = self.state()?;
        if state.is_root() {
            return Err(Error::WrongFileType);
        }
        let raw = vol.read_entry_set(state.dir_pos, state.set_count)?;
        Ok(decode(&raw)?.meta)
    }

    pub fn create_time<D: BlockDevice>(&self, vol: &mut Volume<D>) -> Result<DateTime, Error<D::Error>> {
        Ok(self.dir_entry(vol)?.create_time)
    }

    pub fn modify_time<D: BlockDevice>(&self, vol: &mut Volume<D>) -> Result<DateTime, Error<D::Error>> {
        Ok(self.dir_entry(vol)?.modify_time)
    }

    /// Overwrites the creation and/or modification time. Setting the
    /// modification time also sets the access time.
    pub fn set_timestamps<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        create: Option<DateTime>,
        modify: Option<DateTime>,
    ) -> Result<(), Error<D::Error>> {
        self.with_state(WRITE_ERROR, |state| {
            if state.is_root() {
                return Err(Error::WrongFileType);
            }
            let touch = state.flags & FLAG_DIRTY != 0;
            state.write_meta(vol, touch, |meta| {
                if let Some(time) = create {
                    meta.create_time = time;
                }
                if let Some(time) = modify {
                    meta.modify_time = time;
                    meta.access_time = time;
                }
            })?;
            vol.sync()
        })
    }

    /// Replaces the read-only, hidden, system and archive bits.
    pub fn set_attributes<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        attributes: FileAttributes,
    ) -> Result<(), Error<D::Error>> {
        self.with_state(WRITE_ERROR, |state| {
            if state.is_root() {
                return Err(Error::WrongFileType);
            }
            state.attributes.remove(FileAttributes::SETTABLE);
            state.attributes.insert(attributes.intersection(FileAttributes::SETTABLE));
            let touch = state.flags & FLAG_DIRTY != 0;
            state.write_meta(vol, touch, |_| {})?;
            vol.sync()
        })
    }
}
