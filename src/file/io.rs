use core::cmp;

use super::{File, Handle, OpenFile, FLAG_APPEND, FLAG_DIRTY, FLAG_SYNC, READ_ERROR, WRITE_ERROR};
use crate::{device::BlockDevice, error::Error, volume::Volume, SECTOR_SIZE};

const LINE_END: &[u8] = b"\n";

/// A saved stream position. Restoring it with [`File::set_pos`] skips the
/// chain walk a seek to the same offset would need.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilePos {
    pub position: u64,
    /// Cluster holding byte `position - 1`; 0 at position 0.
    pub cluster: u32,
}

impl OpenFile {
    pub(crate) fn rewind(&mut self) {
        self.cur_position = 0;
        self.cur_cluster = 0;
    }

    /// Cluster holding byte `cur_position`, which must start a cluster.
    /// `None` past the last allocated cluster.
    pub(crate) fn cluster_at_boundary<D: BlockDevice>(
        &self,
        vol: &mut Volume<D>,
    ) -> Result<Option<u32>, Error<D::Error>> {
        if self.cur_position == 0 {
            return Ok((self.first_cluster != 0).then_some(self.first_cluster));
        }
        if self.is_contiguous() {
            let allocated = vol.clusters_for(self.data_length);
            let next = self.cur_cluster + 1;
            return Ok((((next - self.first_cluster) as u64) < allocated).then_some(next));
        }
        vol.fat_get(self.cur_cluster)
    }

    pub(crate) fn seek_set<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        pos: u64,
    ) -> Result<(), Error<D::Error>> {
        if pos == self.cur_position {
            return Ok(());
        }
        if pos == 0 {
            self.rewind();
            return Ok(());
        }
        if !self.is_root() && pos > self.data_length {
            return Err(Error::InvalidSeek);
        }

        let shift = vol.cluster_shift();
        let target_index = (pos - 1) >> shift;
        let cluster = if self.is_contiguous() {
            self.first_cluster + target_index as u32
        } else {
            let (mut cluster, mut steps) = if self.cur_position == 0
                || target_index < (self.cur_position - 1) >> shift
            {
                (self.first_cluster, target_index)
            } else {
                (self.cur_cluster, target_index - ((self.cur_position - 1) >> shift))
            };
            if cluster == 0 {
                return Err(Error::InvalidSeek);
            }
            while steps > 0 {
                cluster = vol.fat_get(cluster)?.ok_or(Error::InvalidSeek)?;
                steps -= 1;
            }
            cluster
        };
        self.cur_cluster = cluster;
        self.cur_position = pos;
        Ok(())
    }

    pub(crate) fn read<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        buf: &mut [u8],
        done: &mut usize,
    ) -> Result<(), Error<D::Error>> {
        if !self.is_readable() {
            return Err(Error::AccessDenied);
        }
        let mut remaining = buf.len() as u64;
        if !self.is_root() {
            remaining = cmp::min(remaining, self.data_length.saturating_sub(self.cur_position));
        }

        let mut block = [0u8; SECTOR_SIZE];
        while remaining > 0 {
            let cluster_offset = self.cur_position & vol.cluster_mask();
            let cluster = if cluster_offset == 0 {
                match self.cluster_at_boundary(vol)? {
                    Some(cluster) => cluster,
                    // Root directory: end of chain is end of data.
                    None if self.is_root() => break,
                    None => return Err(Error::Corrupt),
                }
            } else {
                self.cur_cluster
            };
            let sector_offset = (cluster_offset as usize) % SECTOR_SIZE;
            let n = cmp::min(remaining, (SECTOR_SIZE - sector_offset) as u64) as usize;
            let dst = &mut buf[*done..*done + n];

            let valid = if self.is_root() {
                n
            } else {
                cmp::min(n as u64, self.valid_length.saturating_sub(self.cur_position)) as usize
            };
            if valid > 0 {
                let lba = vol.cluster_start_sector(cluster)? + (cluster_offset as u32 >> 9);
                if n == SECTOR_SIZE {
                    vol.read_sector(lba, &mut block)?;
                    dst.copy_from_slice(&block);
                } else {
                    let sector = vol.cache_load(lba)?;
                    dst[..valid].copy_from_slice(&sector[sector_offset..sector_offset + valid]);
                }
            }
            dst[valid..].fill(0);

            self.cur_cluster = cluster;
            self.cur_position += n as u64;
            *done += n;
            remaining -= n as u64;
        }
        Ok(())
    }

    /// Writes `len` bytes at the position: from `src` when given, zeros
    /// otherwise. Grows the cluster chain as needed.
    fn write_bytes<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        src: Option<&[u8]>,
        len: u64,
    ) -> Result<(), Error<D::Error>> {
        let mut written = 0u64;
        while written < len {
            let cluster_offset = self.cur_position & vol.cluster_mask();
            let cluster = if cluster_offset == 0 {
                match self.cluster_at_boundary(vol)? {
                    Some(cluster) => cluster,
                    None => self.add_cluster(vol)?,
                }
            } else {
                self.cur_cluster
            };
            let sector_offset = (cluster_offset as usize) % SECTOR_SIZE;
            let n = cmp::min(len - written, (SECTOR_SIZE - sector_offset) as u64) as usize;
            let lba = vol.cluster_start_sector(cluster)? + (cluster_offset as u32 >> 9);
            let chunk = src.map(|src| &src[written as usize..written as usize + n]);

            if n == SECTOR_SIZE || (sector_offset == 0 && self.cur_position >= self.valid_length) {
                // Nothing in this sector is worth preserving.
                let mut block = [0u8; SECTOR_SIZE];
                if let Some(chunk) = chunk {
                    block[..n].copy_from_slice(chunk);
                }
                vol.write_sector(lba, &block)?;
            } else {
                let sector = vol.cache_load(lba)?;
                match chunk {
                    Some(chunk) => sector[sector_offset..sector_offset + n].copy_from_slice(chunk),
                    None => sector[sector_offset..sector_offset + n].fill(0),
                }
                vol.cache_store()?;
            }

            // The position is advanced only after the bytes are on the media.
            self.cur_cluster = cluster;
            self.cur_position += n as u64;
            written += n as u64;
            if self.cur_position > self.data_length {
                self.data_length = self.cur_position;
                self.flags |= FLAG_DIRTY;
            }
            if self.cur_position > self.valid_length {
                self.valid_length = self.cur_position;
                self.flags |= FLAG_DIRTY;
            }
        }
        Ok(())
    }

    /// Zero-fills `[valid_length, cur_position)` so the gap never exposes
    /// stale media bytes.
    pub(crate) fn fill_gap<D: BlockDevice>(&mut self, vol: &mut Volume<D>) -> Result<(), Error<D::Error>> {
        if self.cur_position <= self.valid_length {
            return Ok(());
        }
        let target = self.cur_position;
        self.seek_set(vol, self.valid_length)?;
        self.write_bytes(vol, None, target - self.valid_length)
    }

    pub(crate) fn write<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        src: &[u8],
    ) -> Result<usize, Error<D::Error>> {
        if !self.is_writable() {
            return Err(Error::AccessDenied);
        }
        if !self.is_file() {
            return Err(Error::WrongFileType);
        }
        if self.flags & FLAG_APPEND != 0 {
            self.seek_set(vol, self.valid_length)?;
        }
        self.fill_gap(vol)?;
        self.write_bytes(vol, Some(src), src.len() as u64)?;
        if self.flags & FLAG_SYNC != 0 {
            self.sync(vol)?;
        }
        Ok(src.len())
    }
}

impl File {
    /// Reads up to `buf.len()` bytes. `Ok(0)` means end of data.
    ///
    /// A device error after some bytes were transferred returns the short
    /// count and sets the read-error bit; with nothing transferred it
    /// returns the error.
    pub fn read<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        buf: &mut [u8],
    ) -> Result<usize, Error<D::Error>> {
        let mut done = 0usize;
        let result = self.with_state(READ_ERROR, |state| state.read(vol, buf, &mut done));
        match result {
            Ok(()) => Ok(done),
            Err(err) if err.is_io() && done > 0 => {
                log::warn!("exfat: read_err short={} err={:?}", done, err);
                Ok(done)
            }
            Err(err) => Err(err),
        }
    }

    /// Next byte, `None` at end of data.
    pub fn read_byte<D: BlockDevice>(&mut self, vol: &mut Volume<D>) -> Result<Option<u8>, Error<D::Error>> {
        let mut byte = [0u8; 1];
        Ok((self.read(vol, &mut byte)? == 1).then_some(byte[0]))
    }

    /// Next byte without advancing the position.
    pub fn peek<D: BlockDevice>(&mut self, vol: &mut Volume<D>) -> Result<Option<u8>, Error<D::Error>> {
        let saved = *self.state()?;
        let byte = self.read_byte(vol);
        if let Handle::Open(state) = &mut self.handle {
            state.cur_position = saved.cur_position;
            state.cur_cluster = saved.cur_cluster;
        }
        byte
    }

    /// Reads one line into `buf`. Stops after the first byte found in
    /// `delims` (`\n` when `None`), at end of data, or when `buf` is full.
    /// Carriage returns are dropped. Returns the bytes stored, 0 at end of
    /// data.
    pub fn read_line<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        buf: &mut [u8],
        delims: Option<&[u8]>,
    ) -> Result<usize, Error<D::Error>> {
        let delims = delims.unwrap_or(LINE_END);
        let mut len = 0;
        while len < buf.len() {
            let byte = match self.read_byte(vol) {
                Ok(Some(byte)) => byte,
                Ok(None) => break,
                // The read-error bit is already set; keep what was read.
                Err(_) if len > 0 => break,
                Err(err) => return Err(err),
            };
            if byte == b'\r' {
                continue;
            }
            buf[len] = byte;
            len += 1;
            if delims.contains(&byte) {
                break;
            }
        }
        Ok(len)
    }

    /// Writes all of `buf` or fails, setting the write-error bit.
    pub fn write<D: BlockDevice>(&mut self, vol: &mut Volume<D>, buf: &[u8]) -> Result<usize, Error<D::Error>> {
        self.with_state(WRITE_ERROR, |state| state.write(vol, buf))
            .inspect_err(|err| log::warn!("exfat: write_err len={} err={:?}", buf.len(), err))
    }

    pub fn seek_set<D: BlockDevice>(&mut self, vol: &mut Volume<D>, pos: u64) -> Result<(), Error<D::Error>> {
        self.with_state(0, |state| state.seek_set(vol, pos))
    }

    pub fn seek_cur<D: BlockDevice>(&mut self, vol: &mut Volume<D>, offset: i64) -> Result<(), Error<D::Error>> {
        let pos = self
            .cur_position()
            .checked_add_signed(offset)
            .ok_or(Error::InvalidSeek)?;
        self.seek_set(vol, pos)
    }

    /// Seeks relative to the end of valid data.
    pub fn seek_end<D: BlockDevice>(&mut self, vol: &mut Volume<D>, offset: i64) -> Result<(), Error<D::Error>> {
        let pos = self
            .state()?
            .valid_length
            .checked_add_signed(offset)
            .ok_or(Error::InvalidSeek)?;
        self.seek_set(vol, pos)
    }

    pub fn rewind<D: BlockDevice>(&mut self, vol: &mut Volume<D>) -> Result<(), Error<D::Error>> {
        self.seek_set(vol, 0)
    }

    pub fn get_pos(&self) -> FilePos {
        match &self.handle {
            Handle::Open(state) => FilePos {
                position: state.cur_position,
                cluster: state.cur_cluster,
            },
            Handle::Closed => FilePos::default(),
        }
    }

    /// Restores a position taken with [`File::get_pos`] on this object.
    /// The FAT is not consulted.
    pub fn set_pos<D: BlockDevice>(&mut self, vol: &Volume<D>, pos: FilePos) -> Result<(), Error<D::Error>> {
        self.with_state(0, |state| {
            let in_range = state.is_root() || pos.position <= state.data_length;
            let cluster_ok = if pos.position == 0 {
                pos.cluster == 0
            } else {
                vol.is_valid_cluster(pos.cluster)
            };
            if !in_range || !cluster_ok {
                return Err(Error::InvalidSeek);
            }
            state.cur_position = pos.position;
            state.cur_cluster = pos.cluster;
            Ok(())
        })
    }
}
