use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiBus};

use super::card::{SdCard, SdError, SD_CMD13, SD_CMD17, SD_CMD24, SD_CMD9, SD_SECTOR_SIZE};

impl<SPI, CS, DL> SdCard<SPI, CS, DL>
where
    SPI: SpiBus,
    CS: OutputPin,
    DL: DelayNs,
{
    pub fn read_sector(
        &mut self,
        lba: u32,
        out: &mut [u8; SD_SECTOR_SIZE],
    ) -> Result<(), SdError<SPI::Error>> {
        if self.cached_sector_lba == Some(lba) {
            out.copy_from_slice(&self.cached_sector);
            return Ok(());
        }
        let high_capacity = self.status.ok_or(SdError::NotInitialized)?.high_capacity;
        self.read_data_sector_512_into(lba, high_capacity, out)?;
        self.cached_sector.copy_from_slice(out);
        self.cached_sector_lba = Some(lba);
        Ok(())
    }

    pub fn write_sector(
        &mut self,
        lba: u32,
        data: &[u8; SD_SECTOR_SIZE],
    ) -> Result<(), SdError<SPI::Error>> {
        let high_capacity = self.status.ok_or(SdError::NotInitialized)?.high_capacity;
        let arg = if high_capacity {
            lba
        } else {
            lba.saturating_mul(SD_SECTOR_SIZE as u32)
        };

        self.cached_sector_lba = None;

        let cmd24_r1 = self.send_command_hold_cs(SD_CMD24, arg, 0xFF, &mut [])?;
        if cmd24_r1 != 0x00 {
            self.end_transaction();
            return Err(SdError::Cmd24Unexpected(cmd24_r1));
        }

        let _ = self.transfer_byte(0xFF)?;
        let _ = self.transfer_byte(0xFE)?;
        self.spi.write(data).map_err(SdError::Spi)?;
        // Data CRC16 is ignored in SPI mode unless CRC is explicitly enabled.
        let _ = self.transfer_byte(0xFF)?;
        let _ = self.transfer_byte(0xFF)?;

        let response = self.transfer_byte(0xFF)? & 0x1F;
        if response != 0x05 {
            self.end_transaction();
            return Err(SdError::WriteDataRejected(response));
        }

        let released = self.wait_not_busy()?;
        self.end_transaction();
        if !released {
            return Err(SdError::WriteBusyTimeout);
        }

        let mut r2 = [0u8; 1];
        let cmd13_r1 = self.send_command(SD_CMD13, 0, 0xFF, &mut r2)?;
        if cmd13_r1 != 0x00 || r2[0] != 0x00 {
            return Err(SdError::Cmd13Unexpected(cmd13_r1, r2[0]));
        }

        self.cached_sector.copy_from_slice(data);
        self.cached_sector_lba = Some(lba);
        Ok(())
    }

    /// Waits for any in-flight programming to finish.
    pub fn flush(&mut self) -> Result<(), SdError<SPI::Error>> {
        self.cs.set_low().map_err(|_| SdError::ChipSelect)?;
        let released = self.wait_not_busy();
        self.end_transaction();
        if released? {
            Ok(())
        } else {
            Err(SdError::WriteBusyTimeout)
        }
    }

    pub fn is_busy(&mut self) -> bool {
        if self.cs.set_low().is_err() {
            return true;
        }
        let busy = !matches!(self.transfer_byte(0xFF), Ok(0xFF));
        self.end_transaction();
        busy
    }

    fn wait_not_busy(&mut self) -> Result<bool, SdError<SPI::Error>> {
        for _ in 0..200_000 {
            if self.transfer_byte(0xFF)? == 0xFF {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub(crate) fn send_command(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
    ) -> Result<u8, SdError<SPI::Error>> {
        self.send_command_inner(cmd, arg, crc, extra_response, true)
    }

    pub(crate) fn send_command_hold_cs(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
    ) -> Result<u8, SdError<SPI::Error>> {
        self.send_command_inner(cmd, arg, crc, extra_response, false)
    }

    fn send_command_inner(
        &mut self,
        cmd: u8,
        arg: u32,
        crc: u8,
        extra_response: &mut [u8],
        release_cs_after: bool,
    ) -> Result<u8, SdError<SPI::Error>> {
        let frame = [
            0x40 | cmd,
            (arg >> 24) as u8,
            (arg >> 16) as u8,
            (arg >> 8) as u8,
            arg as u8,
            crc,
        ];

        self.cs.set_low().map_err(|_| SdError::ChipSelect)?;
        if let Err(err) = self.spi.write(&frame) {
            self.end_transaction();
            return Err(SdError::Spi(err));
        }

        let mut r1 = 0xFFu8;
        let mut got_response = false;
        for _ in 0..16 {
            r1 = self.transfer_byte(0xFF)?;
            if (r1 & 0x80) == 0 {
                got_response = true;
                break;
            }
        }

        if !got_response {
            self.end_transaction();
            return Err(SdError::NoResponse(cmd));
        }

        for slot in extra_response {
            *slot = self.transfer_byte(0xFF)?;
        }

        if release_cs_after {
            self.end_transaction();
        }
        Ok(r1)
    }

    pub(crate) fn send_dummy_clocks(&mut self, bytes: usize) -> Result<(), SdError<SPI::Error>> {
        for _ in 0..bytes {
            let _ = self.transfer_byte(0xFF)?;
        }
        Ok(())
    }

    fn transfer_byte(&mut self, byte: u8) -> Result<u8, SdError<SPI::Error>> {
        let mut frame = [byte];
        self.spi.transfer_in_place(&mut frame).map_err(SdError::Spi)?;
        Ok(frame[0])
    }

    fn wait_data_token(&mut self, cmd: u8) -> Result<(), SdError<SPI::Error>> {
        let mut token = 0xFFu8;
        for _ in 0..50_000 {
            token = self.transfer_byte(0xFF)?;
            if token != 0xFF {
                break;
            }
        }
        match token {
            0xFE => Ok(()),
            0xFF => Err(SdError::DataTokenTimeout(cmd)),
            other => Err(SdError::DataTokenUnexpected(cmd, other)),
        }
    }

    pub(crate) fn read_data_block(&mut self) -> Result<[u8; 16], SdError<SPI::Error>> {
        self.wait_data_token(SD_CMD9)?;
        let mut block = [0xFFu8; 16];
        self.spi.transfer_in_place(&mut block).map_err(SdError::Spi)?;
        // Read and discard CRC16.
        let _ = self.transfer_byte(0xFF)?;
        let _ = self.transfer_byte(0xFF)?;
        Ok(block)
    }

    pub(crate) fn read_data_sector_512_into(
        &mut self,
        lba: u32,
        high_capacity: bool,
        out: &mut [u8; SD_SECTOR_SIZE],
    ) -> Result<(), SdError<SPI::Error>> {
        let arg = if high_capacity {
            lba
        } else {
            lba.saturating_mul(512)
        };
        let cmd17_r1 = self.send_command_hold_cs(SD_CMD17, arg, 0xFF, &mut [])?;
        if cmd17_r1 != 0x00 {
            self.end_transaction();
            return Err(SdError::Cmd17Unexpected(cmd17_r1));
        }

        let result = self.read_sector_payload(out);
        self.end_transaction();
        result
    }

    fn read_sector_payload(
        &mut self,
        out: &mut [u8; SD_SECTOR_SIZE],
    ) -> Result<(), SdError<SPI::Error>> {
        self.wait_data_token(SD_CMD17)?;
        out.fill(0xFF);
        self.spi.transfer_in_place(out).map_err(SdError::Spi)?;
        // Discard data CRC16.
        let _ = self.transfer_byte(0xFF)?;
        let _ = self.transfer_byte(0xFF)?;
        Ok(())
    }

    pub(crate) fn end_transaction(&mut self) {
        let _ = self.cs.set_high();
        let _ = self.transfer_byte(0xFF);
    }
}
