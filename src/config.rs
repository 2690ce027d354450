use crate::entry::time::DateTime;

/// Character set accepted in names.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NameEncoding {
    /// Printable ASCII only; every byte of a name is one character.
    #[default]
    Ascii,
    /// Any Unicode scalar value outside the illegal set.
    Unicode,
}

/// Returns the wall-clock time stamped into directory entries.
pub type TimeSource = fn() -> DateTime;

#[derive(Clone, Copy, Debug)]
pub struct VolumeConfig {
    pub name_encoding: NameEncoding,
    pub time_source: TimeSource,
}

impl VolumeConfig {
    pub const fn new() -> Self {
        Self {
            name_encoding: NameEncoding::Ascii,
            time_source: default_time,
        }
    }

    pub const fn with_name_encoding(mut self, encoding: NameEncoding) -> Self {
        self.name_encoding = encoding;
        self
    }

    pub const fn with_time_source(mut self, source: TimeSource) -> Self {
        self.time_source = source;
        self
    }
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub fn default_time() -> DateTime {
    DateTime::EPOCH_2020
}
