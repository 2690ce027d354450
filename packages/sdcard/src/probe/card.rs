use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiBus};

pub(crate) const SD_CMD0: u8 = 0;
pub(crate) const SD_CMD8: u8 = 8;
pub(crate) const SD_CMD9: u8 = 9;
pub(crate) const SD_CMD13: u8 = 13;
pub(crate) const SD_CMD16: u8 = 16;
pub(crate) const SD_CMD17: u8 = 17;
pub(crate) const SD_CMD24: u8 = 24;
pub(crate) const SD_CMD55: u8 = 55;
pub(crate) const SD_ACMD41: u8 = 41;
pub(crate) const SD_CMD58: u8 = 58;
pub const SD_SECTOR_SIZE: usize = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdCardVersion {
    V1,
    V2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SdProbeStatus {
    pub version: SdCardVersion,
    pub high_capacity: bool,
    pub capacity_bytes: u64,
    pub filesystem: SdFilesystem,
}

impl SdProbeStatus {
    pub fn sector_count(&self) -> u32 {
        let sectors = self.capacity_bytes / SD_SECTOR_SIZE as u64;
        if sectors > u32::MAX as u64 {
            u32::MAX
        } else {
            sectors as u32
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdFilesystem {
    ExFat,
    Fat32,
    Fat16,
    Fat12,
    Ntfs,
    Unknown,
}

#[derive(Debug)]
pub enum SdError<E> {
    Spi(E),
    ChipSelect,
    Cmd0Failed(u8),
    Cmd8Unexpected(u8),
    Cmd8EchoMismatch([u8; 4]),
    Acmd41Timeout(u8),
    Cmd58Unexpected(u8),
    Cmd9Unexpected(u8),
    Cmd13Unexpected(u8, u8),
    Cmd16Unexpected(u8),
    Cmd17Unexpected(u8),
    Cmd24Unexpected(u8),
    NoResponse(u8),
    DataTokenTimeout(u8),
    DataTokenUnexpected(u8, u8),
    WriteDataRejected(u8),
    WriteBusyTimeout,
    NotInitialized,
    CapacityDecodeFailed,
}

/// SD card in SPI mode.
///
/// Owns the bus, the chip-select line and a delay source. Sector numbers are
/// always block addresses; byte addressing for standard-capacity cards is
/// handled internally.
pub struct SdCard<SPI, CS, DL> {
    pub(crate) spi: SPI,
    pub(crate) cs: CS,
    pub(crate) delay: DL,
    pub(crate) status: Option<SdProbeStatus>,
    pub(crate) cached_sector_lba: Option<u32>,
    pub(crate) cached_sector: [u8; SD_SECTOR_SIZE],
}

impl<SPI, CS, DL> SdCard<SPI, CS, DL>
where
    SPI: SpiBus,
    CS: OutputPin,
    DL: DelayNs,
{
    pub fn new(spi: SPI, mut cs: CS, delay: DL) -> Self {
        let _ = cs.set_high();
        Self {
            spi,
            cs,
            delay,
            status: None,
            cached_sector_lba: None,
            cached_sector: [0; SD_SECTOR_SIZE],
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.status.is_some()
    }

    pub fn status(&self) -> Option<SdProbeStatus> {
        self.status
    }

    pub fn invalidate(&mut self) {
        self.status = None;
        self.cached_sector_lba = None;
    }

    pub fn release(self) -> (SPI, CS, DL) {
        (self.spi, self.cs, self.delay)
    }
}
