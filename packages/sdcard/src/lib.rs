#![no_std]

pub mod probe;

pub use probe::{SdCard, SdCardVersion, SdError, SdFilesystem, SdProbeStatus, SD_SECTOR_SIZE};
