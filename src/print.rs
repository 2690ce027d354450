//! Formatted output layered on [`File::write`].
//!
//! Nothing here touches the on-disk format. Output goes to any
//! [`ByteSink`]: an open file through [`FileSink`], or a caller buffer.

use core::{fmt, fmt::Write as _, ops::BitOr};

use crate::{
    device::BlockDevice,
    entry::time::DateTime,
    error::Error,
    file::{File, OpenFlags},
    volume::Volume,
    MAX_NAME_LEN, MAX_PATH_DEPTH,
};

/// Destination for formatted bytes.
pub trait ByteSink {
    /// Writes as much of `bytes` as possible and returns the count taken.
    fn write_bytes(&mut self, bytes: &[u8]) -> usize;
}

impl<const N: usize> ByteSink for heapless::Vec<u8, N> {
    fn write_bytes(&mut self, bytes: &[u8]) -> usize {
        let take = bytes.len().min(N - self.len());
        // Cannot fail: `take` fits the remaining capacity.
        let _ = self.extend_from_slice(&bytes[..take]);
        take
    }
}

/// Writes into an open file. Failures leave the file's write-error bit
/// set and report zero bytes.
pub struct FileSink<'f, 'v, D: BlockDevice> {
    file: &'f mut File,
    vol: &'v mut Volume<D>,
}

impl<'f, 'v, D: BlockDevice> FileSink<'f, 'v, D> {
    pub fn new(file: &'f mut File, vol: &'v mut Volume<D>) -> Self {
        Self { file, vol }
    }
}

impl<D: BlockDevice> ByteSink for FileSink<'_, '_, D> {
    fn write_bytes(&mut self, bytes: &[u8]) -> usize {
        self.file.write(self.vol, bytes).unwrap_or(0)
    }
}

impl<D: BlockDevice> fmt::Write for FileSink<'_, '_, D> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.write_bytes(s.as_bytes()) == s.len() {
            Ok(())
        } else {
            Err(fmt::Error)
        }
    }
}

/// One printable value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arg<'a> {
    Str(&'a str),
    Char(char),
    U32(u32),
    I32(i32),
    U64(u64),
    /// Upper-case hexadecimal without prefix.
    Hex(u32),
}

/// Formats `args` into a stack line and writes it.
fn emit<S: ByteSink + ?Sized>(sink: &mut S, args: fmt::Arguments<'_>) -> usize {
    let mut line = heapless::String::<64>::new();
    let _ = line.write_fmt(args);
    sink.write_bytes(line.as_bytes())
}

fn print_arg<S: ByteSink + ?Sized>(sink: &mut S, arg: Arg<'_>) -> usize {
    match arg {
        Arg::Str(text) => sink.write_bytes(text.as_bytes()),
        Arg::Char(ch) => {
            let mut buf = [0u8; 4];
            sink.write_bytes(ch.encode_utf8(&mut buf).as_bytes())
        }
        Arg::U32(value) => emit(sink, format_args!("{value}")),
        Arg::I32(value) => emit(sink, format_args!("{value}")),
        Arg::U64(value) => emit(sink, format_args!("{value}")),
        Arg::Hex(value) => emit(sink, format_args!("{value:X}")),
    }
}

fn print_term<S: ByteSink + ?Sized>(sink: &mut S, term: char) -> usize {
    if term == '\n' {
        sink.write_bytes(b"\r\n")
    } else {
        print_arg(sink, Arg::Char(term))
    }
}

/// Writes `arg` followed by `term`; a `'\n'` terminator is written as CR LF.
pub fn print_field<S: ByteSink + ?Sized>(sink: &mut S, arg: Arg<'_>, term: Option<char>) -> usize {
    let mut written = print_arg(sink, arg);
    if let Some(term) = term {
        written += print_term(sink, term);
    }
    written
}

pub fn print_args<S: ByteSink + ?Sized>(sink: &mut S, args: &[Arg<'_>]) -> usize {
    args.iter().map(|arg| print_arg(sink, *arg)).sum()
}

/// `YYYY-MM-DD hh:mm`
pub fn print_date_time<S: ByteSink + ?Sized>(sink: &mut S, time: &DateTime) -> usize {
    emit(
        sink,
        format_args!(
            "{:04}-{:02}-{:02} {:02}:{:02}",
            time.year, time.month, time.day, time.hour, time.minute
        ),
    )
}

/// Valid length right-aligned in 20 columns.
pub fn print_file_size<S: ByteSink + ?Sized>(sink: &mut S, file: &File) -> usize {
    emit(sink, format_args!("{:>20}", file.file_size()))
}

pub fn print_name<D: BlockDevice, S: ByteSink + ?Sized>(
    sink: &mut S,
    vol: &mut Volume<D>,
    file: &File,
) -> Result<usize, Error<D::Error>> {
    let mut name = [0u8; MAX_NAME_LEN * 3];
    let len = file.get_name(vol, &mut name)?;
    Ok(sink.write_bytes(&name[..len]))
}

pub fn print_modify_date_time<D: BlockDevice, S: ByteSink + ?Sized>(
    sink: &mut S,
    vol: &mut Volume<D>,
    file: &File,
) -> Result<usize, Error<D::Error>> {
    let time = file.modify_time(vol)?;
    Ok(print_date_time(sink, &time))
}

pub fn print_create_date_time<D: BlockDevice, S: ByteSink + ?Sized>(
    sink: &mut S,
    vol: &mut Volume<D>,
    file: &File,
) -> Result<usize, Error<D::Error>> {
    let time = file.create_time(vol)?;
    Ok(print_date_time(sink, &time))
}

/// Options for [`ls`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LsFlags(u8);

/// Include hidden entries.
pub const LS_A: LsFlags = LsFlags(0x01);
/// Prefix the modification time.
pub const LS_DATE: LsFlags = LsFlags(0x02);
/// Prefix the size.
pub const LS_SIZE: LsFlags = LsFlags(0x04);
/// Recurse into subdirectories.
pub const LS_R: LsFlags = LsFlags(0x08);

impl LsFlags {
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for LsFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Lists `dir` from its start, one CR LF terminated line per entry.
/// Directories get a trailing `/`; recursion indents by two spaces.
pub fn ls<D: BlockDevice, S: ByteSink + ?Sized>(
    vol: &mut Volume<D>,
    dir: &mut File,
    sink: &mut S,
    flags: LsFlags,
) -> Result<(), Error<D::Error>> {
    ls_level(vol, dir, sink, flags, 0)
}

fn ls_level<D: BlockDevice, S: ByteSink + ?Sized>(
    vol: &mut Volume<D>,
    dir: &mut File,
    sink: &mut S,
    flags: LsFlags,
    depth: usize,
) -> Result<(), Error<D::Error>> {
    dir.rewind(vol)?;
    let mut entry = File::new();
    while entry.open_next(vol, dir, OpenFlags::READ)? {
        if !entry.is_hidden() || flags.contains(LS_A) {
            for _ in 0..depth * 2 {
                sink.write_bytes(b" ");
            }
            if flags.contains(LS_DATE) {
                print_modify_date_time(sink, vol, &entry)?;
                sink.write_bytes(b" ");
            }
            if flags.contains(LS_SIZE) {
                print_file_size(sink, &entry);
                sink.write_bytes(b" ");
            }
            print_name(sink, vol, &entry)?;
            if entry.is_dir() {
                sink.write_bytes(b"/");
            }
            sink.write_bytes(b"\r\n");
            if flags.contains(LS_R) && entry.is_dir() && depth + 1 < MAX_PATH_DEPTH {
                ls_level(vol, &mut entry, sink, flags, depth + 1)?;
            }
        }
        entry.close(vol)?;
    }
    Ok(())
}

/// Largest span [`dmp_file`] prints.
const DUMP_LIMIT: usize = 0xFFF0;

/// Hex dump of up to `len` bytes from `pos`: offset, 16 bytes in hex and
/// their printable ASCII per line. Returns the bytes dumped.
pub fn dmp_file<D: BlockDevice, S: ByteSink + ?Sized>(
    vol: &mut Volume<D>,
    file: &mut File,
    sink: &mut S,
    pos: u64,
    len: usize,
) -> Result<usize, Error<D::Error>> {
    let len = len.min(DUMP_LIMIT);
    file.seek_set(vol, pos)?;
    let mut line = [0u8; 16];
    let mut offset = 0usize;
    while offset < len {
        let want = (len - offset).min(line.len());
        let got = file.read(vol, &mut line[..want])?;
        if got == 0 {
            break;
        }
        emit(sink, format_args!("{offset:04X} "));
        for idx in 0..line.len() {
            match line[..got].get(idx) {
                Some(byte) => emit(sink, format_args!(" {byte:02X}")),
                None => sink.write_bytes(b"   "),
            };
        }
        sink.write_bytes(b"  ");
        for &byte in &line[..got] {
            let shown = if (b' '..0x7F).contains(&byte) { byte } else { b'.' };
            sink.write_bytes(&[shown]);
        }
        sink.write_bytes(b"\r\n");
        offset += got;
    }
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use core::fmt::Write;

    use super::*;
    use crate::{
        config::VolumeConfig,
        device::MemDisk,
        file::FileAttributes,
        volume::format::{format, FormatOptions},
        SECTOR_SIZE,
    };

    type Sink = heapless::Vec<u8, 4096>;

    fn fixed_time() -> DateTime {
        DateTime::new(2024, 5, 17, 10, 30, 42)
    }

    fn formatted() -> Vec<u8> {
        let mut backing = vec![0u8; 4096 * SECTOR_SIZE];
        let options = FormatOptions {
            sectors_per_cluster: 1,
            ..FormatOptions::default()
        };
        format(&mut MemDisk::new(&mut backing), &options).unwrap();
        backing
    }

    fn mount(backing: &mut [u8]) -> Volume<MemDisk<'_>> {
        let config = VolumeConfig::new().with_time_source(fixed_time);
        Volume::mount(MemDisk::new(backing), config).unwrap()
    }

    fn put(vol: &mut Volume<MemDisk<'_>>, path: &str, data: &[u8]) {
        let mut file = vol.open(path, OpenFlags::WRITE | OpenFlags::CREAT).unwrap();
        file.write(vol, data).unwrap();
        file.close(vol).unwrap();
    }

    fn text(sink: &Sink) -> &str {
        core::str::from_utf8(sink).unwrap()
    }

    #[test]
    fn fields_and_terminators() {
        let mut sink = Sink::new();
        print_field(&mut sink, Arg::U32(42), Some('\n'));
        print_field(&mut sink, Arg::I32(-7), Some(','));
        print_field(&mut sink, Arg::Hex(0xBEEF), None);
        print_field(&mut sink, Arg::U64(u64::MAX), Some(' '));
        print_args(&mut sink, &[Arg::Str("x="), Arg::Char('é'), Arg::I32(0)]);
        assert_eq!(text(&sink), "42\r\n-7,BEEF18446744073709551615 x=é0");
    }

    #[test]
    fn buffer_sink_stops_at_capacity() {
        let mut sink = heapless::Vec::<u8, 4>::new();
        assert_eq!(sink.write_bytes(b"abcdef"), 4);
        assert_eq!(sink.write_bytes(b"g"), 0);
        assert_eq!(&sink[..], b"abcd");
    }

    #[test]
    fn file_sink_writes_through_the_handle() {
        let mut backing = formatted();
        let mut vol = mount(&mut backing);
        let mut file = vol.open("/OUT.TXT", OpenFlags::RDWR | OpenFlags::CREAT).unwrap();
        {
            let mut sink = FileSink::new(&mut file, &mut vol);
            write!(sink, "{}-{}", 1, 2).unwrap();
            print_field(&mut sink, Arg::Str("!"), Some('\n'));
        }
        file.rewind(&mut vol).unwrap();
        let mut buf = [0u8; 16];
        let n = file.read(&mut vol, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"1-2!\r\n");
    }

    #[test]
    fn file_sink_reports_failed_writes() {
        let mut backing = formatted();
        let mut vol = mount(&mut backing);
        put(&mut vol, "/RO.TXT", b"x");
        let mut file = vol.open("/RO.TXT", OpenFlags::READ).unwrap();
        let mut sink = FileSink::new(&mut file, &mut vol);
        assert_eq!(sink.write_bytes(b"nope"), 0);
        assert!(write!(sink, "nope").is_err());
        assert!(file.write_error());
    }

    #[test]
    fn ls_lists_names_recursively_and_hides_hidden() {
        let mut backing = formatted();
        let mut vol = mount(&mut backing);
        put(&mut vol, "/A.TXT", b"hello");
        put(&mut vol, "/H.TXT", b"");
        let mut hidden = vol.open("/H.TXT", OpenFlags::READ).unwrap();
        hidden.set_attributes(&mut vol, FileAttributes::HIDDEN).unwrap();
        hidden.close(&mut vol).unwrap();
        let mut root = vol.open_root();
        let mut sub = File::new();
        sub.mkdir(&mut vol, &mut root, "/SUB", false).unwrap();
        sub.close(&mut vol).unwrap();
        put(&mut vol, "/SUB/B.TXT", b"bb");

        let mut sink = Sink::new();
        ls(&mut vol, &mut root, &mut sink, LS_R).unwrap();
        assert_eq!(text(&sink), "A.TXT\r\nSUB/\r\n  B.TXT\r\n");

        let mut sink = Sink::new();
        ls(&mut vol, &mut root, &mut sink, LS_A | LS_SIZE).unwrap();
        let expected = format!(
            "{:>20} A.TXT\r\n{:>20} H.TXT\r\n{:>20} SUB/\r\n",
            5,
            0,
            vol.bytes_per_cluster()
        );
        assert_eq!(text(&sink), expected);
    }

    #[test]
    fn ls_with_dates_uses_modification_time() {
        let mut backing = formatted();
        let mut vol = mount(&mut backing);
        put(&mut vol, "/A.TXT", b"hello");
        let mut root = vol.open_root();
        let mut sink = Sink::new();
        ls(&mut vol, &mut root, &mut sink, LS_DATE).unwrap();
        assert_eq!(text(&sink), "2024-05-17 10:30 A.TXT\r\n");

        let file = vol.open("/A.TXT", OpenFlags::READ).unwrap();
        let mut sink = Sink::new();
        print_create_date_time(&mut sink, &mut vol, &file).unwrap();
        assert_eq!(text(&sink), "2024-05-17 10:30");
    }

    #[test]
    fn hex_dump_lines() {
        let mut backing = formatted();
        let mut vol = mount(&mut backing);
        put(&mut vol, "/D.BIN", b"ABCDEFGHIJKLMNOP\x01R");
        let mut file = vol.open("/D.BIN", OpenFlags::READ).unwrap();

        let mut sink = Sink::new();
        assert_eq!(dmp_file(&mut vol, &mut file, &mut sink, 0, 100).unwrap(), 18);
        let dump = text(&sink);
        let mut lines = dump.split("\r\n");
        assert_eq!(
            lines.next().unwrap(),
            "0000  41 42 43 44 45 46 47 48 49 4A 4B 4C 4D 4E 4F 50  ABCDEFGHIJKLMNOP"
        );
        let second = lines.next().unwrap();
        assert!(second.starts_with("0010  01 52   "));
        assert!(second.ends_with("  .R"));
        assert_eq!(lines.next(), Some(""));

        let mut sink = Sink::new();
        assert_eq!(dmp_file(&mut vol, &mut file, &mut sink, 16, 1).unwrap(), 1);
    }
}
