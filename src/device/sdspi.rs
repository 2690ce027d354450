use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiBus};
use sdcard::{SdCard, SdError};

use super::BlockDevice;
use crate::Block;

impl<SPI, CS, DL> BlockDevice for SdCard<SPI, CS, DL>
where
    SPI: SpiBus,
    CS: OutputPin,
    DL: DelayNs,
{
    type Error = SdError<SPI::Error>;

    fn read_sectors(&mut self, first_sector: u32, dst: &mut [Block]) -> Result<(), Self::Error> {
        for (idx, block) in dst.iter_mut().enumerate() {
            self.read_sector(first_sector + idx as u32, block)?;
        }
        Ok(())
    }

    fn write_sectors(&mut self, first_sector: u32, src: &[Block]) -> Result<(), Self::Error> {
        for (idx, block) in src.iter().enumerate() {
            self.write_sector(first_sector + idx as u32, block)?;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<(), Self::Error> {
        self.flush()
    }

    fn sector_count(&mut self) -> Result<u32, Self::Error> {
        let status = match self.status() {
            Some(status) => status,
            None => self.init()?,
        };
        Ok(status.sector_count())
    }

    fn is_busy(&mut self) -> bool {
        SdCard::is_busy(self)
    }
}
