//! Open file and directory handles.
//!
//! A [`File`] is either closed or holds the state of one open object. Every
//! operation borrows the [`Volume`] it was opened on; nothing is cached
//! between calls besides the handle's own position and lengths.

mod alloc;
mod dir;
mod io;
mod mutate;
mod open;

use core::ops::BitOr;

use crate::{
    device::BlockDevice,
    entry::{ATTRIB_ARCHIVE, ATTRIB_DIRECTORY, ATTRIB_HIDDEN, ATTRIB_READ_ONLY, ATTRIB_SYSTEM},
    error::Error,
    volume::Volume,
};

pub(crate) use dir::DirPos;
pub use io::FilePos;

/// Flags accepted by [`File::open`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenFlags(u16);

impl OpenFlags {
    pub const READ: Self = Self(0x0001);
    pub const WRITE: Self = Self(0x0002);
    pub const RDWR: Self = Self(0x0003);
    /// Every write goes to the current end of valid data.
    pub const APPEND: Self = Self(0x0004);
    /// Position at the end of valid data after opening.
    pub const AT_END: Self = Self(0x0008);
    pub const CREAT: Self = Self(0x0010);
    pub const EXCL: Self = Self(0x0020);
    /// Sync after every write.
    pub const SYNC: Self = Self(0x0040);
    pub const TRUNC: Self = Self(0x0080);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for OpenFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Attribute bits of an open handle. The low bits mirror the on-disk
/// attributes; `FILE` and `ROOT` only exist on handles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileAttributes(u8);

impl FileAttributes {
    pub const NONE: Self = Self(0);
    pub const READ_ONLY: Self = Self(ATTRIB_READ_ONLY as u8);
    pub const HIDDEN: Self = Self(ATTRIB_HIDDEN as u8);
    pub const SYSTEM: Self = Self(ATTRIB_SYSTEM as u8);
    pub const FILE: Self = Self(0x08);
    pub const SUB_DIR: Self = Self(ATTRIB_DIRECTORY as u8);
    pub const ARCHIVE: Self = Self(ATTRIB_ARCHIVE as u8);
    pub const ROOT: Self = Self(0x40);

    const COPY_MASK: u16 =
        ATTRIB_READ_ONLY | ATTRIB_HIDDEN | ATTRIB_SYSTEM | ATTRIB_DIRECTORY | ATTRIB_ARCHIVE;

    /// Bits [`File::set_attributes`] may change.
    const SETTABLE: Self = Self(
        Self::READ_ONLY.0 | Self::HIDDEN.0 | Self::SYSTEM.0 | Self::ARCHIVE.0,
    );

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub(crate) fn from_disk(attributes: u16) -> Self {
        let copied = (attributes & Self::COPY_MASK) as u8;
        if attributes & ATTRIB_DIRECTORY != 0 {
            Self(copied)
        } else {
            Self(copied | Self::FILE.0)
        }
    }

    pub(crate) fn to_disk(self) -> u16 {
        self.0 as u16 & Self::COPY_MASK
    }

    fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for FileAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

pub const WRITE_ERROR: u8 = 0x01;
pub const READ_ERROR: u8 = 0x02;

pub(crate) const FLAG_READ: u8 = 0x01;
pub(crate) const FLAG_WRITE: u8 = 0x02;
pub(crate) const FLAG_APPEND: u8 = 0x04;
pub(crate) const FLAG_SYNC: u8 = 0x08;
pub(crate) const FLAG_CONTIGUOUS: u8 = 0x40;
pub(crate) const FLAG_DIRTY: u8 = 0x80;

/// State of an open file or directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct OpenFile {
    pub(crate) attributes: FileAttributes,
    pub(crate) flags: u8,
    pub(crate) cur_position: u64,
    /// Cluster holding byte `cur_position - 1`; 0 at position 0.
    pub(crate) cur_cluster: u32,
    pub(crate) first_cluster: u32,
    pub(crate) data_length: u64,
    pub(crate) valid_length: u64,
    pub(crate) dir_pos: DirPos,
    pub(crate) set_count: u8,
}

impl OpenFile {
    pub(crate) fn root<D: BlockDevice>(vol: &Volume<D>) -> Self {
        Self {
            attributes: FileAttributes::ROOT,
            flags: FLAG_READ,
            cur_position: 0,
            cur_cluster: 0,
            first_cluster: vol.root_directory_cluster(),
            data_length: 0,
            valid_length: 0,
            dir_pos: DirPos::NONE,
            set_count: 0,
        }
    }

    pub(crate) fn is_dir(&self) -> bool {
        self.attributes.contains(FileAttributes::SUB_DIR) || self.is_root()
    }

    pub(crate) fn is_root(&self) -> bool {
        self.attributes.contains(FileAttributes::ROOT)
    }

    pub(crate) fn is_file(&self) -> bool {
        self.attributes.contains(FileAttributes::FILE)
    }

    pub(crate) fn is_contiguous(&self) -> bool {
        self.flags & FLAG_CONTIGUOUS != 0
    }

    pub(crate) fn is_readable(&self) -> bool {
        self.flags & FLAG_READ != 0
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.flags & FLAG_WRITE != 0
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.flags |= FLAG_DIRTY;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Handle {
    #[default]
    Closed,
    Open(OpenFile),
}

/// A file or directory handle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct File {
    handle: Handle,
    error: u8,
}

impl File {
    pub const fn new() -> Self {
        Self {
            handle: Handle::Closed,
            error: 0,
        }
    }

    pub(crate) fn state<E>(&self) -> Result<&OpenFile, Error<E>> {
        match &self.handle {
            Handle::Open(state) => Ok(state),
            Handle::Closed => Err(Error::NotOpen),
        }
    }

    pub(crate) fn set_open(&mut self, state: OpenFile) {
        self.handle = Handle::Open(state);
        self.error = 0;
    }

    /// Runs `op` on a copy of the open state and stores the copy back
    /// whether or not `op` succeeded. A failure sets `error_bit`.
    pub(crate) fn with_state<T, E>(
        &mut self,
        error_bit: u8,
        op: impl FnOnce(&mut OpenFile) -> Result<T, Error<E>>,
    ) -> Result<T, Error<E>> {
        let mut state = *self.state()?;
        let result = op(&mut state);
        self.handle = Handle::Open(state);
        if result.is_err() {
            self.error |= error_bit;
        }
        result
    }

    pub fn is_open(&self) -> bool {
        matches!(self.handle, Handle::Open(_))
    }

    fn attributes(&self) -> FileAttributes {
        match &self.handle {
            Handle::Open(state) => state.attributes,
            Handle::Closed => FileAttributes::default(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(&self.handle, Handle::Open(state) if state.is_dir())
    }

    pub fn is_file(&self) -> bool {
        self.attributes().contains(FileAttributes::FILE)
    }

    pub fn is_root(&self) -> bool {
        self.attributes().contains(FileAttributes::ROOT)
    }

    pub fn is_sub_dir(&self) -> bool {
        self.attributes().contains(FileAttributes::SUB_DIR)
    }

    pub fn is_hidden(&self) -> bool {
        self.attributes().contains(FileAttributes::HIDDEN)
    }

    pub fn is_read_only(&self) -> bool {
        self.attributes().contains(FileAttributes::READ_ONLY)
    }

    pub fn is_system(&self) -> bool {
        self.attributes().contains(FileAttributes::SYSTEM)
    }

    pub fn is_contiguous(&self) -> bool {
        matches!(&self.handle, Handle::Open(state) if state.is_contiguous())
    }

    pub fn is_readable(&self) -> bool {
        matches!(&self.handle, Handle::Open(state) if state.is_readable())
    }

    pub fn is_writable(&self) -> bool {
        matches!(&self.handle, Handle::Open(state) if state.is_writable())
    }

    pub fn file_attributes(&self) -> FileAttributes {
        self.attributes()
    }

    pub fn cur_position(&self) -> u64 {
        match &self.handle {
            Handle::Open(state) => state.cur_position,
            Handle::Closed => 0,
        }
    }

    /// Bytes of valid data.
    pub fn file_size(&self) -> u64 {
        self.valid_length()
    }

    pub fn valid_length(&self) -> u64 {
        match &self.handle {
            Handle::Open(state) => state.valid_length,
            Handle::Closed => 0,
        }
    }

    pub fn data_length(&self) -> u64 {
        match &self.handle {
            Handle::Open(state) => state.data_length,
            Handle::Closed => 0,
        }
    }

    pub fn first_cluster(&self) -> u32 {
        match &self.handle {
            Handle::Open(state) => state.first_cluster,
            Handle::Closed => 0,
        }
    }

    /// Bytes between the position and the end of valid data.
    pub fn available(&self) -> u64 {
        match &self.handle {
            Handle::Open(state) if state.is_file() => {
                state.valid_length.saturating_sub(state.cur_position)
            }
            _ => 0,
        }
    }

    pub fn error(&self) -> u8 {
        self.error
    }

    pub fn read_error(&self) -> bool {
        self.error & READ_ERROR != 0
    }

    pub fn write_error(&self) -> bool {
        self.error & WRITE_ERROR != 0
    }

    pub fn clear_error(&mut self) {
        self.error = 0;
    }

    pub fn clear_write_error(&mut self) {
        self.error &= !WRITE_ERROR;
    }
}
