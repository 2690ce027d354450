use super::{
    dir::{DirLookup, Found},
    File, FileAttributes, Handle, OpenFile, OpenFlags, FLAG_APPEND, FLAG_CONTIGUOUS, FLAG_READ,
    FLAG_SYNC, FLAG_WRITE,
};
use crate::{
    device::BlockDevice,
    entry::{encode, name::encode_name, set_count_for, EntryMeta, ATTRIB_ARCHIVE, ATTRIB_DIRECTORY},
    error::Error,
    path::{parse_path, ParsedPath},
    volume::Volume,
    DIR_ENTRY_SIZE,
};

fn check_flags<E>(flags: OpenFlags) -> Result<(), Error<E>> {
    if flags.bits() & OpenFlags::RDWR.bits() == 0 {
        return Err(Error::InvalidArgument);
    }
    if flags.contains(OpenFlags::EXCL) && !flags.contains(OpenFlags::CREAT) {
        return Err(Error::InvalidArgument);
    }
    Ok(())
}

fn handle_flags(flags: OpenFlags) -> u8 {
    let mut out = 0;
    if flags.contains(OpenFlags::READ) {
        out |= FLAG_READ;
    }
    if flags.contains(OpenFlags::WRITE) {
        out |= FLAG_WRITE;
    }
    if flags.contains(OpenFlags::APPEND) {
        out |= FLAG_APPEND;
    }
    if flags.contains(OpenFlags::SYNC) {
        out |= FLAG_SYNC;
    }
    out
}

impl OpenFile {
    fn from_found<E>(found: &Found, flags: u8) -> Result<Self, Error<E>> {
        let meta = &found.set.meta;
        if meta.data_length > 0 && meta.first_cluster == 0 {
            return Err(Error::Corrupt);
        }
        let contiguous = if meta.contiguous { FLAG_CONTIGUOUS } else { 0 };
        Ok(Self {
            attributes: FileAttributes::from_disk(meta.attributes),
            flags: flags | contiguous,
            cur_position: 0,
            cur_cluster: 0,
            first_cluster: meta.first_cluster,
            data_length: meta.data_length,
            valid_length: if meta.is_dir() {
                meta.data_length
            } else {
                meta.valid_length
            },
            dir_pos: found.pos,
            set_count: found.set_count,
        })
    }

    /// Applies the open-time checks and side effects to an existing object.
    fn open_found<D: BlockDevice>(
        vol: &mut Volume<D>,
        found: &Found,
        flags: OpenFlags,
    ) -> Result<Self, Error<D::Error>> {
        let mut state = Self::from_found(found, handle_flags(flags))?;
        let modifies = flags.contains(OpenFlags::WRITE) || flags.contains(OpenFlags::TRUNC);
        if state.is_dir() && (modifies || flags.contains(OpenFlags::APPEND)) {
            return Err(Error::WrongFileType);
        }
        if modifies && state.attributes.contains(FileAttributes::READ_ONLY) {
            return Err(Error::AccessDenied);
        }
        if flags.contains(OpenFlags::TRUNC) {
            state.truncate(vol)?;
        }
        if flags.contains(OpenFlags::AT_END) {
            state.seek_set(vol, state.valid_length)?;
        }
        Ok(state)
    }

    /// Opens or creates `name` in this directory.
    fn open_child<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        name: &str,
        flags: OpenFlags,
    ) -> Result<Self, Error<D::Error>> {
        let name = encode_name(name)?;
        let needed = set_count_for(name.len());
        let create = flags.contains(OpenFlags::CREAT);
        let lookup = self.find_entry(vol, &name, if create { needed } else { 0 })?;

        if let Some(found) = &lookup.found {
            if create && flags.contains(OpenFlags::EXCL) {
                return Err(Error::AlreadyExists);
            }
            return Self::open_found(vol, found, flags);
        }
        if !create {
            return Err(Error::NotFound);
        }
        if !flags.contains(OpenFlags::WRITE) {
            return Err(Error::AccessDenied);
        }

        let pos = self.reserve_entries(vol, &lookup, needed)?;
        let meta = EntryMeta::new(ATTRIB_ARCHIVE, vol.now());
        let set = encode(&meta, &name)?;
        vol.write_entry_set(pos, &set)?;
        vol.sync()?;
        log::debug!(
            "exfat: create cluster={} offset={} entries={}",
            pos.cluster,
            pos.offset,
            needed
        );
        Ok(Self {
            attributes: FileAttributes::from_disk(ATTRIB_ARCHIVE),
            flags: handle_flags(flags),
            cur_position: 0,
            cur_cluster: 0,
            first_cluster: 0,
            data_length: 0,
            valid_length: 0,
            dir_pos: pos,
            set_count: needed as u8,
        })
    }

    /// Creates a subdirectory with one zeroed cluster.
    fn make_dir<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        name: &[u16],
        lookup: &DirLookup,
    ) -> Result<Self, Error<D::Error>> {
        let needed = set_count_for(name.len());
        let pos = self.reserve_entries(vol, lookup, needed)?;
        let cluster = vol.allocate_next(0)?;
        vol.zero_cluster(cluster)?;

        let cluster_bytes = vol.bytes_per_cluster() as u64;
        let mut meta = EntryMeta::new(ATTRIB_DIRECTORY, vol.now());
        meta.first_cluster = cluster;
        meta.data_length = cluster_bytes;
        meta.valid_length = cluster_bytes;
        meta.contiguous = true;
        let set = encode(&meta, name)?;
        vol.write_entry_set(pos, &set)?;
        vol.sync()?;
        log::debug!("exfat: mkdir cluster={} entry_cluster={}", cluster, pos.cluster);

        Ok(Self {
            attributes: FileAttributes::from_disk(ATTRIB_DIRECTORY),
            flags: FLAG_READ | FLAG_CONTIGUOUS,
            cur_position: 0,
            cur_cluster: 0,
            first_cluster: cluster,
            data_length: cluster_bytes,
            valid_length: cluster_bytes,
            dir_pos: pos,
            set_count: needed as u8,
        })
    }

    /// Resolves one path component to a subdirectory, creating it when
    /// `create` is set.
    fn enter<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        component: &str,
        create: bool,
    ) -> Result<Self, Error<D::Error>> {
        let name = encode_name(component)?;
        let needed = if create { set_count_for(name.len()) } else { 0 };
        let lookup = self.find_entry(vol, &name, needed)?;
        match &lookup.found {
            Some(found) if found.set.meta.is_dir() => Self::from_found(found, FLAG_READ),
            Some(_) => Err(Error::WrongFileType),
            None if create => self.make_dir(vol, &name, &lookup),
            None => Err(Error::NotFound),
        }
    }
}

/// Walks `parents` from `start` and runs `op` on the final directory.
/// `start` itself is updated when it is that directory.
fn with_parent<D: BlockDevice, T>(
    vol: &mut Volume<D>,
    start: &mut OpenFile,
    parents: &[&str],
    create_parents: bool,
    op: impl FnOnce(&mut Volume<D>, &mut OpenFile) -> Result<T, Error<D::Error>>,
) -> Result<T, Error<D::Error>> {
    if !start.is_dir() {
        return Err(Error::WrongFileType);
    }
    let mut walked: Option<OpenFile> = None;
    for component in parents {
        let parent = match walked.as_mut() {
            Some(parent) => parent,
            None => &mut *start,
        };
        let next = parent.enter(vol, component, create_parents)?;
        walked = Some(next);
    }
    match walked.as_mut() {
        Some(parent) => op(vol, parent),
        None => op(vol, start),
    }
}

impl File {
    fn starting_dir<D: BlockDevice>(
        &self,
        vol: &Volume<D>,
        parsed: &ParsedPath<'_>,
    ) -> Result<OpenFile, Error<D::Error>> {
        if parsed.from_root {
            Ok(OpenFile::root(vol))
        } else {
            Ok(*self.state()?)
        }
    }

    /// Stores directory state changed while resolving a relative path.
    fn store_dir(&mut self, parsed: &ParsedPath<'_>, state: OpenFile) {
        if !parsed.from_root {
            self.handle = Handle::Open(state);
        }
    }

    pub fn open_root<D: BlockDevice>(&mut self, vol: &Volume<D>) -> Result<(), Error<D::Error>> {
        if self.is_open() {
            return Err(Error::InvalidArgument);
        }
        self.set_open(OpenFile::root(vol));
        Ok(())
    }

    /// Opens `path` relative to `dir`, or to the volume root when the path
    /// starts with `/`.
    pub fn open<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        dir: &mut File,
        path: &str,
        flags: OpenFlags,
    ) -> Result<(), Error<D::Error>> {
        if self.is_open() {
            return Err(Error::InvalidArgument);
        }
        check_flags(flags)?;
        let parsed = parse_path(path, vol.config.name_encoding)?;
        let mut start = dir.starting_dir(vol, &parsed)?;

        let state = match parsed.split_last() {
            None => {
                if flags.bits() & !OpenFlags::READ.bits() != 0 {
                    return Err(Error::WrongFileType);
                }
                start
            }
            Some((last, parents)) => {
                let result = with_parent(vol, &mut start, parents, false, |vol, parent| {
                    parent.open_child(vol, last, flags)
                });
                dir.store_dir(&parsed, start);
                result?
            }
        };
        self.set_open(state);
        Ok(())
    }

    /// Opens the next object in `dir` from its current position. Returns
    /// `false` at the end of the directory.
    pub fn open_next<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        dir: &mut File,
        flags: OpenFlags,
    ) -> Result<bool, Error<D::Error>> {
        if self.is_open() {
            return Err(Error::InvalidArgument);
        }
        check_flags(flags)?;
        if flags.contains(OpenFlags::CREAT) {
            return Err(Error::InvalidArgument);
        }
        let mut state = *dir.state()?;
        if !state.is_dir() {
            return Err(Error::WrongFileType);
        }
        if state.cur_position % DIR_ENTRY_SIZE as u64 != 0 {
            return Err(Error::InvalidSeek);
        }
        let result = state.next_entry_set(vol);
        dir.handle = Handle::Open(state);
        let Some(found) = result? else {
            return Ok(false);
        };
        let state = OpenFile::open_found(vol, &found, flags)?;
        self.set_open(state);
        Ok(true)
    }

    /// Creates the directory `path` and leaves this handle open on it.
    /// With `create_parents` missing intermediate directories are created.
    pub fn mkdir<D: BlockDevice>(
        &mut self,
        vol: &mut Volume<D>,
        parent: &mut File,
        path: &str,
        create_parents: bool,
    ) -> Result<(), Error<D::Error>> {
        if self.is_open() {
            return Err(Error::InvalidArgument);
        }
        let parsed = parse_path(path, vol.config.name_encoding)?;
        let Some((last, parents)) = parsed.split_last() else {
            return Err(Error::AlreadyExists);
        };
        let mut start = parent.starting_dir(vol, &parsed)?;
        let result = with_parent(vol, &mut start, parents, create_parents, |vol, dir| {
            let name = encode_name(last)?;
            let lookup = dir.find_entry(vol, &name, set_count_for(name.len()))?;
            if lookup.found.is_some() {
                return Err(Error::AlreadyExists);
            }
            dir.make_dir(vol, &name, &lookup)
        });
        parent.store_dir(&parsed, start);
        self.set_open(result?);
        Ok(())
    }

    pub fn exists<D: BlockDevice>(
        vol: &mut Volume<D>,
        dir: &mut File,
        path: &str,
    ) -> Result<bool, Error<D::Error>> {
        let mut file = File::new();
        match file.open(vol, dir, path, OpenFlags::READ) {
            Ok(()) => Ok(true),
            Err(Error::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Deletes the file at `path`.
    pub fn remove_path<D: BlockDevice>(
        vol: &mut Volume<D>,
        dir: &mut File,
        path: &str,
    ) -> Result<(), Error<D::Error>> {
        let mut file = File::new();
        file.open(vol, dir, path, OpenFlags::WRITE)?;
        file.remove(vol)
    }
}

impl<D: BlockDevice> Volume<D> {
    pub fn open_root(&self) -> File {
        let mut root = File::new();
        root.set_open(OpenFile::root(self));
        root
    }

    /// Opens `path` relative to the root directory.
    pub fn open(&mut self, path: &str, flags: OpenFlags) -> Result<File, Error<D::Error>> {
        let mut root = self.open_root();
        let mut file = File::new();
        file.open(self, &mut root, path, flags)?;
        Ok(file)
    }
}
