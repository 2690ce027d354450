use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error<E> {
    NotFound,
    AlreadyExists,
    IllegalName,
    NotOpen,
    WrongFileType,
    Corrupt,
    OutOfSpace,
    AccessDenied,
    NotEmpty,
    InvalidSeek,
    InvalidArgument,
    Io(E),
}

impl<E> Error<E> {
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("not found"),
            Self::AlreadyExists => f.write_str("already exists"),
            Self::IllegalName => f.write_str("illegal name"),
            Self::NotOpen => f.write_str("handle not open"),
            Self::WrongFileType => f.write_str("wrong file type"),
            Self::Corrupt => f.write_str("corrupt filesystem structure"),
            Self::OutOfSpace => f.write_str("no free cluster"),
            Self::AccessDenied => f.write_str("access denied"),
            Self::NotEmpty => f.write_str("directory not empty"),
            Self::InvalidSeek => f.write_str("position outside object"),
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::Io(err) => write!(f, "device error: {err:?}"),
        }
    }
}

/// A malformed on-disk structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CorruptEntry;

/// A path component that cannot name a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IllegalName;

impl<E> From<CorruptEntry> for Error<E> {
    fn from(_: CorruptEntry) -> Self {
        Self::Corrupt
    }
}

impl<E> From<IllegalName> for Error<E> {
    fn from(_: IllegalName) -> Self {
        Self::IllegalName
    }
}
