mod common;

use common::{config, fixed_time, formatted, mount, pattern};
use exfatfs::{api, Error, File, MemDisk, NameEncoding, OpenFlags, Volume};

fn assert_lengths(file: &File) {
    assert!(
        file.valid_length() <= file.data_length(),
        "valid {} > data {}",
        file.valid_length(),
        file.data_length()
    );
}

fn read_exact(vol: &mut Volume<MemDisk<'_>>, file: &mut File, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    let mut done = 0;
    while done < len {
        let n = file.read(vol, &mut out[done..]).unwrap();
        assert!(n > 0, "unexpected end of data at {done}");
        done += n;
    }
    out
}

fn name_of(vol: &mut Volume<MemDisk<'_>>, file: &File) -> String {
    let mut buf = [0u8; 800];
    let n = file.get_name(vol, &mut buf).unwrap();
    String::from_utf8(buf[..n].to_vec()).unwrap()
}

#[test]
fn create_exclusive_write_close_and_read_back() {
    let mut backing = formatted(8);
    let mut vol = mount(&mut backing);
    let data = pattern(1000, 1);

    let flags = OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::EXCL;
    let mut file = vol.open("A.TXT", flags).unwrap();
    assert_eq!(file.write(&mut vol, &data).unwrap(), 1000);
    file.close(&mut vol).unwrap();

    let mut file = vol.open("A.TXT", OpenFlags::READ).unwrap();
    assert_eq!(file.file_size(), 1000);
    assert_eq!(read_exact(&mut vol, &mut file, 1000), data);
    let mut extra = [0u8; 8];
    assert_eq!(file.read(&mut vol, &mut extra).unwrap(), 0);
}

#[test]
fn read_after_write_at_arbitrary_offsets() {
    let mut backing = formatted(8);
    let mut vol = mount(&mut backing);
    let mut file = vol.open("/RAW.BIN", OpenFlags::RDWR | OpenFlags::CREAT).unwrap();
    let base = pattern(20_000, 9);
    file.write(&mut vol, &base).unwrap();

    for (pos, len, seed) in [(0usize, 10usize, 1u8), (4090, 20, 2), (8191, 4100, 3), (19_990, 10, 4)] {
        let chunk = pattern(len, seed);
        file.seek_set(&mut vol, pos as u64).unwrap();
        file.write(&mut vol, &chunk).unwrap();
        file.seek_set(&mut vol, pos as u64).unwrap();
        assert_eq!(read_exact(&mut vol, &mut file, len), chunk, "offset {pos}");
        assert_lengths(&file);
    }
    assert_eq!(file.file_size(), 20_000);
}

#[test]
fn metadata_survives_close_and_remount() {
    let mut backing = formatted(8);
    let (valid, data) = {
        let mut vol = mount(&mut backing);
        let mut file = vol.open("/KEEP.DAT", OpenFlags::WRITE | OpenFlags::CREAT).unwrap();
        file.pre_allocate(&mut vol, 10_000).unwrap();
        file.write(&mut vol, &pattern(3000, 5)).unwrap();
        let lengths = (file.valid_length(), file.data_length());
        file.close(&mut vol).unwrap();
        vol.unmount().unwrap();
        lengths
    };
    assert_eq!((valid, data), (3000, 10_000));

    let mut vol = mount(&mut backing);
    let mut file = vol.open("/keep.dat", OpenFlags::READ).unwrap();
    assert_eq!(file.valid_length(), valid);
    assert_eq!(file.data_length(), data);
    assert_eq!(name_of(&mut vol, &file), "KEEP.DAT");
    assert_eq!(read_exact(&mut vol, &mut file, 3000), pattern(3000, 5));
    assert_eq!(file.modify_time(&mut vol).unwrap(), fixed_time());
}

#[test]
fn truncate_sets_size_and_frees_clusters() {
    let mut backing = formatted(1);
    let mut vol = mount(&mut backing);
    let free_before = vol.free_cluster_count().unwrap();

    let mut file = vol.open("/T.BIN", OpenFlags::RDWR | OpenFlags::CREAT).unwrap();
    file.write(&mut vol, &pattern(10 * 512, 2)).unwrap();
    file.truncate_to(&mut vol, 1500).unwrap();
    assert_eq!(file.file_size(), 1500);
    assert_lengths(&file);
    assert_eq!(vol.free_cluster_count().unwrap(), free_before - 3);
    file.close(&mut vol).unwrap();

    let mut other = vol.open("/U.BIN", OpenFlags::WRITE | OpenFlags::CREAT).unwrap();
    other.write(&mut vol, &pattern(7 * 512, 4)).unwrap();
    other.close(&mut vol).unwrap();
    assert_eq!(vol.free_cluster_count().unwrap(), free_before - 10);
}

#[test]
fn rename_changes_only_the_name() {
    let mut backing = formatted(8);
    let mut vol = mount(&mut backing);
    let data = pattern(9000, 6);
    let mut file = vol.open("/OLD.BIN", OpenFlags::RDWR | OpenFlags::CREAT).unwrap();
    file.write(&mut vol, &data).unwrap();
    let lengths = (file.valid_length(), file.data_length(), file.first_cluster());

    let mut root = vol.open_root();
    file.rename(&mut vol, &mut root, "/renamed with a considerably longer name.bin")
        .unwrap();
    assert_eq!(
        (file.valid_length(), file.data_length(), file.first_cluster()),
        lengths
    );
    file.close(&mut vol).unwrap();

    assert_eq!(vol.open("/OLD.BIN", OpenFlags::READ).unwrap_err(), Error::NotFound);
    let mut file = vol
        .open("/renamed with a considerably longer name.bin", OpenFlags::READ)
        .unwrap();
    assert_eq!((file.valid_length(), file.data_length()), (lengths.0, lengths.1));
    assert_eq!(read_exact(&mut vol, &mut file, data.len()), data);
}

#[test]
fn preallocated_file_reads_zero_until_written() {
    let mut backing = formatted(8);
    let mut vol = mount(&mut backing);
    let mut file = vol.open("/PRE.BIN", OpenFlags::RDWR | OpenFlags::CREAT).unwrap();
    file.pre_allocate(&mut vol, 4096).unwrap();
    assert_eq!(file.data_length(), 4096);
    assert_eq!(file.valid_length(), 0);
    assert_lengths(&file);

    file.seek_set(&mut vol, 2000).unwrap();
    assert_eq!(file.read_byte(&mut vol).unwrap(), Some(0));
    file.rewind(&mut vol).unwrap();
    assert!(read_exact(&mut vol, &mut file, 4096).iter().all(|&b| b == 0));
}

#[test]
fn trunc_open_replaces_content() {
    let mut backing = formatted(8);
    let mut vol = mount(&mut backing);
    api::write_file(&mut vol, "/T.TXT", &pattern(5000, 1)).unwrap();

    let mut file = vol.open("/T.TXT", OpenFlags::WRITE | OpenFlags::TRUNC).unwrap();
    file.write(&mut vol, b"0123456789").unwrap();
    file.close(&mut vol).unwrap();

    let file = vol.open("/T.TXT", OpenFlags::READ).unwrap();
    assert_eq!(file.file_size(), 10);
}

#[test]
fn exclusive_create_leaves_existing_file_alone() {
    let mut backing = formatted(8);
    let mut vol = mount(&mut backing);
    api::write_file(&mut vol, "/E.TXT", b"original").unwrap();

    let flags = OpenFlags::RDWR | OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::TRUNC;
    assert_eq!(vol.open("/E.TXT", flags).unwrap_err(), Error::AlreadyExists);

    let mut out = [0u8; 16];
    let n = api::read_file(&mut vol, "/E.TXT", &mut out).unwrap();
    assert_eq!(&out[..n], b"original");
}

#[test]
fn name_encoding_is_chosen_per_volume() {
    let mut backing = formatted(8);
    {
        let mut vol = mount(&mut backing);
        assert_eq!(
            api::write_file(&mut vol, "/café.txt", b"x").unwrap_err(),
            Error::IllegalName
        );
        vol.unmount().unwrap();
    }

    let unicode = config().with_name_encoding(NameEncoding::Unicode);
    let mut vol = Volume::mount(MemDisk::new(&mut backing), unicode).unwrap();
    api::write_file(&mut vol, "/café.txt", b"au lait").unwrap();
    let info = api::stat(&mut vol, "/CAFÉ.TXT").unwrap();
    assert_eq!(info.name.as_str(), "café.txt");
    assert_eq!(info.size, 7);
}

#[test]
fn deep_tree_round_trip() {
    let mut backing = formatted(1);
    let mut vol = mount(&mut backing);
    let mut root = vol.open_root();
    let mut leaf = File::new();
    leaf.mkdir(&mut vol, &mut root, "/a/b/c/d", true).unwrap();
    leaf.close(&mut vol).unwrap();

    for idx in 0..40 {
        let path = format!("/a/b/c/d/entry-{idx:03}.log");
        api::write_file(&mut vol, &path, path.as_bytes()).unwrap();
    }
    let mut out = vec![api::DirEntryInfo::EMPTY; 64];
    assert_eq!(api::list_dir(&mut vol, "/a/b/c/d", &mut out).unwrap(), 40);
    for (idx, info) in out.iter().take(40).enumerate() {
        assert_eq!(info.name.as_str(), format!("entry-{idx:03}.log"));
    }

    let mut buf = [0u8; 64];
    let n = api::read_file(&mut vol, "/a/b/c/d/entry-017.log", &mut buf).unwrap();
    assert_eq!(&buf[..n], b"/a/b/c/d/entry-017.log");

    assert_eq!(api::remove(&mut vol, "/a/b/c").unwrap_err(), Error::NotEmpty);
}

#[test]
fn volume_full_reports_out_of_space() {
    let mut backing = formatted(8);
    let mut vol = mount(&mut backing);
    let free = vol.free_cluster_count().unwrap() as u64;
    let cluster = vol.bytes_per_cluster() as u64;

    let mut file = vol.open("/FULL.BIN", OpenFlags::WRITE | OpenFlags::CREAT).unwrap();
    assert_eq!(
        file.pre_allocate(&mut vol, (free + 1) * cluster).unwrap_err(),
        Error::OutOfSpace
    );
    file.pre_allocate(&mut vol, free * cluster).unwrap();
    file.close(&mut vol).unwrap();
    assert_eq!(vol.free_cluster_count().unwrap(), 0);

    let mut other = vol.open("/MORE.BIN", OpenFlags::WRITE | OpenFlags::CREAT).unwrap();
    assert_eq!(other.write(&mut vol, b"x").unwrap_err(), Error::OutOfSpace);
    assert!(other.write_error());
}
