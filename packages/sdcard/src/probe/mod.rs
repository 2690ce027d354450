mod card;
mod helpers;
mod init;
mod io;
#[cfg(test)]
mod tests;

pub use card::{SdCard, SdCardVersion, SdError, SdFilesystem, SdProbeStatus, SD_SECTOR_SIZE};
