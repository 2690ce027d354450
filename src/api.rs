//! One-call operations on absolute paths. Each call opens what it needs
//! and closes it again, so no handle outlives the call.

use crate::{
    device::BlockDevice,
    entry::time::DateTime,
    error::Error,
    file::{File, FileAttributes, OpenFlags},
    volume::Volume,
    MAX_NAME_LEN,
};

/// Longest UTF-8 encoding of a name.
pub const NAME_BYTES_MAX: usize = MAX_NAME_LEN * 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: heapless::String<NAME_BYTES_MAX>,
    pub is_dir: bool,
    pub size: u64,
    pub attributes: FileAttributes,
    pub modified: Option<DateTime>,
}

impl DirEntryInfo {
    pub const EMPTY: Self = Self {
        name: heapless::String::new(),
        is_dir: false,
        size: 0,
        attributes: FileAttributes::NONE,
        modified: None,
    };

    fn from_file<D: BlockDevice>(vol: &mut Volume<D>, file: &File) -> Result<Self, Error<D::Error>> {
        let mut raw = [0u8; NAME_BYTES_MAX];
        let len = file.get_name(vol, &mut raw)?;
        let mut name = heapless::String::new();
        // `get_name` only emits whole UTF-8 characters.
        if let Ok(text) = core::str::from_utf8(&raw[..len]) {
            let _ = name.push_str(text);
        }
        let modified = if file.is_root() {
            None
        } else {
            Some(file.modify_time(vol)?)
        };
        Ok(Self {
            name,
            is_dir: file.is_dir(),
            size: file.file_size(),
            attributes: file.file_attributes(),
            modified,
        })
    }
}

/// Closes `file` and returns the first error of `result` and the close.
fn finish<T, D: BlockDevice>(
    vol: &mut Volume<D>,
    file: &mut File,
    result: Result<T, Error<D::Error>>,
) -> Result<T, Error<D::Error>> {
    let closed = file.close(vol);
    let value = result?;
    closed?;
    Ok(value)
}

/// Fills `out` with the entries of the directory at `path` and returns how
/// many were stored. Entries past `out.len()` are skipped.
pub fn list_dir<D: BlockDevice>(
    vol: &mut Volume<D>,
    path: &str,
    out: &mut [DirEntryInfo],
) -> Result<usize, Error<D::Error>> {
    let mut dir = vol.open(path, OpenFlags::READ)?;
    let listed = fill_entries(vol, &mut dir, out);
    finish(vol, &mut dir, listed)
}

fn fill_entries<D: BlockDevice>(
    vol: &mut Volume<D>,
    dir: &mut File,
    out: &mut [DirEntryInfo],
) -> Result<usize, Error<D::Error>> {
    if !dir.is_dir() {
        return Err(Error::WrongFileType);
    }
    let mut count = 0;
    let mut entry = File::new();
    while count < out.len() && entry.open_next(vol, dir, OpenFlags::READ)? {
        let info = DirEntryInfo::from_file(vol, &entry);
        entry.close(vol)?;
        out[count] = info?;
        count += 1;
    }
    Ok(count)
}

/// Reads from the start of the file into `out`; returns the bytes read.
pub fn read_file<D: BlockDevice>(
    vol: &mut Volume<D>,
    path: &str,
    out: &mut [u8],
) -> Result<usize, Error<D::Error>> {
    let mut file = vol.open(path, OpenFlags::READ)?;
    let read = read_into(vol, &mut file, out);
    finish(vol, &mut file, read)
}

fn read_into<D: BlockDevice>(vol: &mut Volume<D>, file: &mut File, out: &mut [u8]) -> Result<usize, Error<D::Error>> {
    let mut done = 0;
    while done < out.len() {
        let n = file.read(vol, &mut out[done..])?;
        if n == 0 {
            break;
        }
        done += n;
    }
    Ok(done)
}

/// Creates or replaces the file at `path` with `data`.
pub fn write_file<D: BlockDevice>(vol: &mut Volume<D>, path: &str, data: &[u8]) -> Result<(), Error<D::Error>> {
    let flags = OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::TRUNC;
    let mut file = vol.open(path, flags)?;
    let written = file.write(vol, data).map(|_| ());
    finish(vol, &mut file, written)
}

pub fn append_file<D: BlockDevice>(vol: &mut Volume<D>, path: &str, data: &[u8]) -> Result<(), Error<D::Error>> {
    let flags = OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::APPEND;
    let mut file = vol.open(path, flags)?;
    let written = file.write(vol, data).map(|_| ());
    finish(vol, &mut file, written)
}

pub fn stat<D: BlockDevice>(vol: &mut Volume<D>, path: &str) -> Result<DirEntryInfo, Error<D::Error>> {
    let mut file = vol.open(path, OpenFlags::READ)?;
    let info = DirEntryInfo::from_file(vol, &file);
    finish(vol, &mut file, info)
}

/// Creates one directory; its parent must exist.
pub fn mkdir<D: BlockDevice>(vol: &mut Volume<D>, path: &str) -> Result<(), Error<D::Error>> {
    let mut root = vol.open_root();
    let mut dir = File::new();
    dir.mkdir(vol, &mut root, path, false)?;
    dir.close(vol)
}

/// Deletes a file or an empty directory.
pub fn remove<D: BlockDevice>(vol: &mut Volume<D>, path: &str) -> Result<(), Error<D::Error>> {
    let mut file = vol.open(path, OpenFlags::READ)?;
    if file.is_dir() {
        return file.rmdir(vol);
    }
    file.close(vol)?;
    let mut root = vol.open_root();
    File::remove_path(vol, &mut root, path)
}

pub fn rename<D: BlockDevice>(vol: &mut Volume<D>, from: &str, to: &str) -> Result<(), Error<D::Error>> {
    let mut file = vol.open(from, OpenFlags::READ)?;
    let mut root = vol.open_root();
    let renamed = file.rename(vol, &mut root, to);
    finish(vol, &mut file, renamed)
}

/// Shrinks the file at `path` to `length` bytes.
pub fn truncate_file<D: BlockDevice>(vol: &mut Volume<D>, path: &str, length: u64) -> Result<(), Error<D::Error>> {
    let mut file = vol.open(path, OpenFlags::WRITE)?;
    let truncated = file.truncate_to(vol, length);
    finish(vol, &mut file, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::VolumeConfig,
        device::{MemDisk, MemDiskError},
        volume::format::{format, FormatOptions},
        Block, SECTOR_SIZE,
    };

    /// Counts device syncs; every handle close ends in one.
    struct SyncCounter<'a> {
        inner: MemDisk<'a>,
        syncs: u32,
    }

    impl BlockDevice for SyncCounter<'_> {
        type Error = MemDiskError;

        fn read_sectors(&mut self, first_sector: u32, dst: &mut [Block]) -> Result<(), Self::Error> {
            self.inner.read_sectors(first_sector, dst)
        }

        fn write_sectors(&mut self, first_sector: u32, src: &[Block]) -> Result<(), Self::Error> {
            self.inner.write_sectors(first_sector, src)
        }

        fn sync(&mut self) -> Result<(), Self::Error> {
            self.syncs += 1;
            Ok(())
        }

        fn sector_count(&mut self) -> Result<u32, Self::Error> {
            self.inner.sector_count()
        }
    }

    fn formatted() -> Vec<u8> {
        let mut backing = vec![0u8; 4096 * SECTOR_SIZE];
        format(&mut MemDisk::new(&mut backing), &FormatOptions::default()).unwrap();
        backing
    }

    fn mount(backing: &mut [u8]) -> Volume<MemDisk<'_>> {
        Volume::mount(MemDisk::new(backing), VolumeConfig::new()).unwrap()
    }

    #[test]
    fn write_then_read() {
        let mut backing = formatted();
        let mut vol = mount(&mut backing);
        write_file(&mut vol, "/hello.txt", b"hello world").unwrap();

        let mut out = [0u8; 64];
        let n = read_file(&mut vol, "/hello.txt", &mut out).unwrap();
        assert_eq!(&out[..n], b"hello world");

        write_file(&mut vol, "/hello.txt", b"bye").unwrap();
        let n = read_file(&mut vol, "/hello.txt", &mut out).unwrap();
        assert_eq!(&out[..n], b"bye");
    }

    #[test]
    fn append_creates_then_extends() {
        let mut backing = formatted();
        let mut vol = mount(&mut backing);
        append_file(&mut vol, "/log.txt", b"one;").unwrap();
        append_file(&mut vol, "/log.txt", b"two;").unwrap();

        let mut out = [0u8; 16];
        let n = read_file(&mut vol, "/log.txt", &mut out).unwrap();
        assert_eq!(&out[..n], b"one;two;");
    }

    #[test]
    fn read_into_short_buffer_stops_at_capacity() {
        let mut backing = formatted();
        let mut vol = mount(&mut backing);
        write_file(&mut vol, "/big.bin", &[5u8; 10_000]).unwrap();
        let mut out = [0u8; 700];
        assert_eq!(read_file(&mut vol, "/big.bin", &mut out).unwrap(), 700);
    }

    #[test]
    fn stat_and_list() {
        let mut backing = formatted();
        let mut vol = mount(&mut backing);
        mkdir(&mut vol, "/logs").unwrap();
        write_file(&mut vol, "/logs/a.txt", b"12345").unwrap();
        write_file(&mut vol, "/logs/b.txt", b"").unwrap();

        let info = stat(&mut vol, "/logs/a.txt").unwrap();
        assert_eq!(info.name.as_str(), "a.txt");
        assert_eq!(info.size, 5);
        assert!(!info.is_dir);
        assert_eq!(info.modified, Some(DateTime::EPOCH_2020));

        let root = stat(&mut vol, "/").unwrap();
        assert_eq!(root.name.as_str(), "/");
        assert!(root.is_dir);
        assert_eq!(root.modified, None);

        let mut out = [DirEntryInfo::EMPTY, DirEntryInfo::EMPTY, DirEntryInfo::EMPTY];
        assert_eq!(list_dir(&mut vol, "/logs", &mut out).unwrap(), 2);
        assert_eq!(out[0].name.as_str(), "a.txt");
        assert_eq!(out[1].name.as_str(), "b.txt");

        let mut one = [DirEntryInfo::EMPTY];
        assert_eq!(list_dir(&mut vol, "/logs", &mut one).unwrap(), 1);
        assert_eq!(
            list_dir(&mut vol, "/logs/a.txt", &mut one).unwrap_err(),
            Error::WrongFileType
        );
    }

    #[test]
    fn rename_remove_and_truncate() {
        let mut backing = formatted();
        let mut vol = mount(&mut backing);
        mkdir(&mut vol, "/d").unwrap();
        write_file(&mut vol, "/d/x.bin", &[1u8; 3000]).unwrap();

        rename(&mut vol, "/d/x.bin", "/y.bin").unwrap();
        assert_eq!(stat(&mut vol, "/d/x.bin").unwrap_err(), Error::NotFound);
        assert_eq!(stat(&mut vol, "/y.bin").unwrap().size, 3000);

        truncate_file(&mut vol, "/y.bin", 10).unwrap();
        assert_eq!(stat(&mut vol, "/y.bin").unwrap().size, 10);
        assert_eq!(
            truncate_file(&mut vol, "/y.bin", 20).unwrap_err(),
            Error::InvalidSeek
        );

        remove(&mut vol, "/d").unwrap();
        remove(&mut vol, "/y.bin").unwrap();
        let mut out = [DirEntryInfo::EMPTY];
        assert_eq!(list_dir(&mut vol, "/", &mut out).unwrap(), 0);
    }

    #[test]
    fn remove_refuses_non_empty_directory() {
        let mut backing = formatted();
        let mut vol = mount(&mut backing);
        mkdir(&mut vol, "/d").unwrap();
        write_file(&mut vol, "/d/f", b"f").unwrap();
        assert_eq!(remove(&mut vol, "/d").unwrap_err(), Error::NotEmpty);
        assert_eq!(mkdir(&mut vol, "/d").unwrap_err(), Error::AlreadyExists);
        assert_eq!(mkdir(&mut vol, "/no/such").unwrap_err(), Error::NotFound);
    }

    #[test]
    fn reads_and_listings_close_their_handles() {
        let mut backing = formatted();
        {
            let mut vol = mount(&mut backing);
            mkdir(&mut vol, "/d").unwrap();
            write_file(&mut vol, "/d/a", b"abc").unwrap();
            write_file(&mut vol, "/d/b", b"").unwrap();
        }
        let device = SyncCounter {
            inner: MemDisk::new(&mut backing),
            syncs: 0,
        };
        let mut vol = Volume::mount(device, VolumeConfig::new()).unwrap();

        let mut out = [0u8; 8];
        assert_eq!(read_file(&mut vol, "/d/a", &mut out).unwrap(), 3);
        assert_eq!(vol.device().syncs, 1);

        vol.device().syncs = 0;
        let mut entries = [DirEntryInfo::EMPTY, DirEntryInfo::EMPTY, DirEntryInfo::EMPTY];
        assert_eq!(list_dir(&mut vol, "/d", &mut entries).unwrap(), 2);
        // One close per listed entry plus the directory itself.
        assert_eq!(vol.device().syncs, 3);
    }
}
