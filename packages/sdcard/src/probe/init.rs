use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiBus};

use super::{
    card::{
        SdCard, SdCardVersion, SdError, SdFilesystem, SdProbeStatus, SD_ACMD41, SD_CMD0, SD_CMD16,
        SD_CMD55, SD_CMD58, SD_CMD8, SD_CMD9, SD_SECTOR_SIZE,
    },
    helpers::{decode_capacity_bytes, detect_vbr_filesystem, first_partition, gpt_first_entry_start},
};

impl<SPI, CS, DL> SdCard<SPI, CS, DL>
where
    SPI: SpiBus,
    CS: OutputPin,
    DL: DelayNs,
{
    /// Re-runs card identification and drops the sector cache.
    ///
    /// The bus must be clocked at 100-400 kHz until this returns; the caller
    /// may raise the clock afterwards.
    pub fn init(&mut self) -> Result<SdProbeStatus, SdError<SPI::Error>> {
        self.cached_sector_lba = None;
        self.probe()
    }

    pub fn probe(&mut self) -> Result<SdProbeStatus, SdError<SPI::Error>> {
        self.status = None;
        self.cs.set_high().map_err(|_| SdError::ChipSelect)?;
        self.send_dummy_clocks(10)?;

        let mut cmd0_r1 = 0xFFu8;
        for _ in 0..16 {
            cmd0_r1 = self.send_command(SD_CMD0, 0, 0x95, &mut [])?;
            if cmd0_r1 == 0x01 {
                break;
            }
        }
        if cmd0_r1 != 0x01 {
            return Err(SdError::Cmd0Failed(cmd0_r1));
        }

        let mut r7 = [0u8; 4];
        let cmd8_r1 = self.send_command(SD_CMD8, 0x0000_01AA, 0x87, &mut r7)?;
        let card_version = if cmd8_r1 == 0x01 {
            if r7[2] != 0x01 || r7[3] != 0xAA {
                return Err(SdError::Cmd8EchoMismatch(r7));
            }
            SdCardVersion::V2
        } else if (cmd8_r1 & 0x04) != 0 {
            SdCardVersion::V1
        } else {
            return Err(SdError::Cmd8Unexpected(cmd8_r1));
        };

        let acmd41_arg = if card_version == SdCardVersion::V2 {
            0x4000_0000
        } else {
            0
        };
        let mut acmd41_r1 = 0xFFu8;
        let mut acmd41_ok = false;
        for _ in 0..200 {
            let _ = self.send_command(SD_CMD55, 0, 0x65, &mut [])?;
            acmd41_r1 = self.send_command(SD_ACMD41, acmd41_arg, 0x77, &mut [])?;
            if acmd41_r1 == 0x00 {
                acmd41_ok = true;
                break;
            }
            self.delay.delay_ms(1);
        }
        if !acmd41_ok {
            return Err(SdError::Acmd41Timeout(acmd41_r1));
        }

        if card_version == SdCardVersion::V1 {
            let cmd16_r1 = self.send_command(SD_CMD16, SD_SECTOR_SIZE as u32, 0xFF, &mut [])?;
            if cmd16_r1 != 0x00 {
                return Err(SdError::Cmd16Unexpected(cmd16_r1));
            }
        }

        let mut ocr = [0u8; 4];
        let cmd58_r1 = self.send_command(SD_CMD58, 0, 0xFD, &mut ocr)?;
        if cmd58_r1 != 0x00 {
            return Err(SdError::Cmd58Unexpected(cmd58_r1));
        }

        let cmd9_r1 = self.send_command_hold_cs(SD_CMD9, 0, 0xAF, &mut [])?;
        if cmd9_r1 != 0x00 {
            self.end_transaction();
            return Err(SdError::Cmd9Unexpected(cmd9_r1));
        }
        let csd = self.read_data_block();
        self.end_transaction();
        let csd = csd?;
        let capacity_bytes = decode_capacity_bytes(&csd).ok_or(SdError::CapacityDecodeFailed)?;
        let high_capacity = (ocr[0] & 0x40) != 0;
        let filesystem = self.detect_filesystem(high_capacity)?;

        let status = SdProbeStatus {
            version: card_version,
            high_capacity,
            capacity_bytes,
            filesystem,
        };
        log::debug!(
            "sdcard: probe_ok version={:?} sdhc={} bytes={} fs={:?}",
            status.version,
            status.high_capacity,
            status.capacity_bytes,
            status.filesystem
        );
        self.status = Some(status);
        Ok(status)
    }

    fn detect_filesystem(&mut self, high_capacity: bool) -> Result<SdFilesystem, SdError<SPI::Error>> {
        let mut sector = [0u8; SD_SECTOR_SIZE];
        self.read_data_sector_512_into(0, high_capacity, &mut sector)?;
        if let Some(fs) = detect_vbr_filesystem(&sector) {
            return Ok(fs);
        }

        let (partition_type, mut partition_lba) = match first_partition(&sector) {
            Some(found) => found,
            None => return Ok(SdFilesystem::Unknown),
        };

        if partition_type == 0xEE {
            // Protective MBR (GPT). Read the first GPT partition entry.
            self.read_data_sector_512_into(2, high_capacity, &mut sector)?;
            if let Some(start) = gpt_first_entry_start(&sector) {
                partition_lba = start;
            }
        }

        self.read_data_sector_512_into(partition_lba, high_capacity, &mut sector)?;
        Ok(detect_vbr_filesystem(&sector).unwrap_or(SdFilesystem::Unknown))
    }
}
