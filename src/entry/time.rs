/// Calendar time as stored in exFAT timestamps (local time, 2 s resolution
/// in the packed field).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DateTime {
    pub const EPOCH_2020: Self = Self {
        year: 2020,
        month: 1,
        day: 1,
        hour: 0,
        minute: 0,
        second: 0,
    };

    pub const fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
        }
    }

    /// Packs into the DOS layout: date in the high half, time in the low half.
    /// Years outside 1980..=2107 are clamped.
    pub fn pack(&self) -> u32 {
        let year = self.year.clamp(1980, 2107) - 1980;
        let date = (year << 9) | ((self.month as u16 & 0x0F) << 5) | (self.day as u16 & 0x1F);
        let time = ((self.hour as u16 & 0x1F) << 11)
            | ((self.minute as u16 & 0x3F) << 5)
            | ((self.second as u16 / 2) & 0x1F);
        ((date as u32) << 16) | time as u32
    }

    pub fn unpack(packed: u32) -> Self {
        let date = (packed >> 16) as u16;
        let time = packed as u16;
        Self {
            year: 1980 + (date >> 9),
            month: ((date >> 5) & 0x0F) as u8,
            day: (date & 0x1F) as u8,
            hour: (time >> 11) as u8,
            minute: ((time >> 5) & 0x3F) as u8,
            second: ((time & 0x1F) * 2) as u8,
        }
    }

    /// Odd seconds, expressed as the 10 ms increment field.
    pub fn centiseconds(&self) -> u8 {
        if self.second % 2 == 1 {
            100
        } else {
            0
        }
    }
}
