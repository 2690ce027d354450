#![cfg_attr(not(test), no_std)]

pub mod api;
pub mod config;
pub mod device;
pub mod entry;
pub mod error;
pub mod file;
pub mod path;
pub mod print;
pub mod volume;

pub const SECTOR_SIZE: usize = 512;
pub const DIR_ENTRY_SIZE: usize = 32;
pub const MAX_NAME_LEN: usize = 255;
pub const CHARS_PER_FRAGMENT: usize = 15;
pub const MAX_PATH_DEPTH: usize = 16;

/// One device sector.
pub type Block = [u8; SECTOR_SIZE];

pub use config::{NameEncoding, TimeSource, VolumeConfig};
pub use device::{BlockDevice, MemDisk, MemDiskError};
pub use entry::time::DateTime;
pub use error::Error;
pub use file::{File, FileAttributes, FilePos, OpenFlags};
pub use volume::{
    format::{format, FormatOptions},
    Volume,
};
