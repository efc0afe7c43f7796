use std::{
    fs,
    io::ErrorKind,
    os::unix::{
        ffi::OsStrExt,
        fs::{symlink, MetadataExt, PermissionsExt},
    },
    path::{Path, PathBuf},
    process::Command,
};

use similar_asserts::assert_eq;
use tempfile::TempDir;
use walkdir::WalkDir;

use xtar::{
    create, create_with_checksum, extract, extract_with_checksum, get_all_xattrs, is_empty,
    set_all_xattrs, Error, Sha256Digest, Xattrs,
};

fn xattrs(pairs: &[(&str, &str)]) -> Xattrs {
    pairs
        .iter()
        .map(|(name, value)| ((*name).into(), value.as_bytes().to_vec()))
        .collect()
}

/// Same location rules as the library's unit tests.
fn tempdir() -> TempDir {
    match std::env::var_os("XTAR_TEST_TMPDIR") {
        Some(dir) => TempDir::with_prefix_in("xtar-test-", dir).unwrap(),
        None => tempfile::tempdir().unwrap(),
    }
}

fn user_xattrs_supported(dir: &Path) -> bool {
    let canary = dir.join(".canary");
    fs::write(&canary, b"").unwrap();
    let supported = set_all_xattrs(&canary, &xattrs(&[("user.canary", "1")])).is_ok();
    fs::remove_file(&canary).unwrap();
    supported
}

fn write_file(path: &Path, content: &str, mode: u32) {
    fs::write(path, content).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

/// A tree with directories, regular files, a symlink and extended attributes.
fn populate(root: &Path, with_xattrs: bool) {
    fs::create_dir_all(root.join("dir/sub")).unwrap();
    fs::create_dir(root.join("empty")).unwrap();
    write_file(&root.join("dir/file.txt"), "hello", 0o640);
    write_file(&root.join("dir/sub/deep.txt"), "deeper", 0o644);
    write_file(
        &root.join("xattrs"),
        "This file is used to test whether extended attributes are preserved.",
        0o600,
    );
    symlink("dir/file.txt", root.join("sym_link")).unwrap();

    if with_xattrs {
        set_all_xattrs(root.join("dir"), &xattrs(&[("user.tag", "v1")])).unwrap();
        set_all_xattrs(
            root.join("xattrs"),
            &xattrs(&[
                ("user.checksum", "asdfsf13434qwf1324"),
                ("user.random", "This is a test"),
            ]),
        )
        .unwrap();
    }
}

#[derive(Debug, PartialEq)]
struct Record {
    name: PathBuf,
    kind: &'static str,
    mode: u32,
    mtime: i64,
    target: Option<PathBuf>,
    content: Option<Vec<u8>>,
    xattrs: Xattrs,
}

/// Everything below `root` that an archive round trip must preserve.
fn snapshot(root: &Path) -> Vec<Record> {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .map(|item| {
            let item = item.unwrap();
            let path = item.path();
            let metadata = fs::symlink_metadata(path).unwrap();
            let file_type = metadata.file_type();
            let user_xattrs = || -> Xattrs {
                get_all_xattrs(path)
                    .unwrap()
                    .into_iter()
                    .filter(|(name, _)| name.as_bytes().starts_with(b"user."))
                    .collect()
            };

            Record {
                name: path.strip_prefix(root).unwrap().to_owned(),
                kind: if file_type.is_dir() {
                    "dir"
                } else if file_type.is_symlink() {
                    "symlink"
                } else {
                    "file"
                },
                mode: if file_type.is_symlink() {
                    0
                } else {
                    metadata.mode() & 0o7777
                },
                mtime: metadata.mtime(),
                target: file_type
                    .is_symlink()
                    .then(|| fs::read_link(path).unwrap()),
                content: file_type.is_file().then(|| fs::read(path).unwrap()),
                xattrs: if file_type.is_symlink() {
                    Xattrs::new()
                } else {
                    user_xattrs()
                },
            }
        })
        .collect()
}

struct Fixture {
    td: TempDir,
    root: PathBuf,
    xattrs: bool,
}

impl Fixture {
    fn new() -> Self {
        let td = tempdir();
        let root = td.path().join("testdata");
        fs::create_dir(&root).unwrap();
        let xattrs = user_xattrs_supported(&root);
        if !xattrs {
            eprintln!("no user xattr support in {:?}, testing without", td.path());
        }
        populate(&root, xattrs);
        Fixture { td, root, xattrs }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.td.path().join(name)
    }
}

fn sha256_of_file(path: &Path) -> Sha256Digest {
    use sha2::{Digest, Sha256};
    Sha256::digest(fs::read(path).unwrap()).into()
}

#[test]
fn test_roundtrip() {
    let fixture = Fixture::new();
    let archive = fixture.path("test.tar");
    let dest = fixture.path("extracted");

    create(&archive, &fixture.root, &fixture.root).unwrap();
    extract(&archive, &dest).unwrap();

    let before = snapshot(&fixture.root);
    assert_eq!(before.len(), 7);
    assert_eq!(snapshot(&dest), before);
}

#[test]
fn test_file_mode_and_dir_xattr() {
    let fixture = Fixture::new();
    let archive = fixture.path("test.tar");
    let dest = fixture.path("extracted");

    create(&archive, &fixture.root, &fixture.root).unwrap();
    extract(&archive, &dest).unwrap();

    assert_eq!(fs::read(dest.join("dir/file.txt")).unwrap(), b"hello");
    assert_eq!(
        fs::metadata(dest.join("dir/file.txt")).unwrap().mode() & 0o7777,
        0o640
    );
    if fixture.xattrs {
        let found = get_all_xattrs(dest.join("dir")).unwrap();
        assert_eq!(found.get(std::ffi::OsStr::new("user.tag")).unwrap(), b"v1");
    }
}

#[test]
fn test_roundtrip_from_current_dir() {
    let fixture = Fixture::new();
    let archive = fixture.path("test.tar");
    let dest = fixture.path("extracted");

    // the other tests only use absolute paths
    std::env::set_current_dir(&fixture.root).unwrap();
    create(&archive, ".", "").unwrap();
    extract(&archive, &dest).unwrap();

    assert_eq!(snapshot(&dest), snapshot(&fixture.root));
    let (root, dest) = (
        fs::metadata(&fixture.root).unwrap(),
        fs::metadata(&dest).unwrap(),
    );
    assert_eq!(dest.mode() & 0o7777, root.mode() & 0o7777);
    assert_eq!(dest.mtime(), root.mtime());
}

#[test]
fn test_deterministic_checksum() {
    let fixture = Fixture::new();
    let first = create_with_checksum(fixture.path("a.tar"), &fixture.root, &fixture.root).unwrap();
    let second = create_with_checksum(fixture.path("b.tar"), &fixture.root, &fixture.root).unwrap();
    assert_eq!(hex::encode(first), hex::encode(second));
}

#[test]
fn test_checksum_is_stream_hash() {
    let fixture = Fixture::new();
    let archive = fixture.path("test.tar");
    let digest = create_with_checksum(&archive, &fixture.root, &fixture.root).unwrap();
    assert_eq!(hex::encode(digest), hex::encode(sha256_of_file(&archive)));
}

#[test]
fn test_extraction_symmetry() {
    let fixture = Fixture::new();
    let archive = fixture.path("test.tar");
    let created = create_with_checksum(&archive, &fixture.root, &fixture.root).unwrap();
    let extracted = extract_with_checksum(&archive, fixture.path("extracted")).unwrap();
    assert_eq!(hex::encode(created), hex::encode(extracted));
}

#[test]
fn test_emptiness() {
    let fixture = Fixture::new();
    let empty_root = fixture.path("empty-root");
    fs::create_dir(&empty_root).unwrap();

    let empty = fixture.path("empty.tar");
    create(&empty, &empty_root, &empty_root).unwrap();
    assert!(is_empty(&empty).unwrap());

    let full = fixture.path("full.tar");
    create(&full, &fixture.root, &fixture.root).unwrap();
    assert!(!is_empty(&full).unwrap());
}

#[test]
fn test_no_overwrite() {
    let fixture = Fixture::new();
    let archive = fixture.path("test.tar");
    create(&archive, &fixture.root, &fixture.root).unwrap();

    let dest = fixture.path("extracted");
    fs::create_dir_all(dest.join("dir")).unwrap();
    fs::write(dest.join("dir/file.txt"), "original").unwrap();

    match extract(&archive, &dest).unwrap_err() {
        Error::Io { path, source } => {
            assert_eq!(source.kind(), ErrorKind::AlreadyExists);
            assert_eq!(path, dest.join("dir/file.txt"));
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(fs::read(dest.join("dir/file.txt")).unwrap(), b"original");
}

#[test]
fn test_prefix_keeps_root_name() {
    let fixture = Fixture::new();
    let archive = fixture.path("test.tar");
    create(&archive, &fixture.root, fixture.td.path()).unwrap();

    let dest = fixture.path("extracted");
    extract(&archive, &dest).unwrap();
    assert_eq!(snapshot(&dest.join("testdata")), snapshot(&fixture.root));
}

#[test_with::executable(tar)]
fn test_gnu_tar_lists_entries() {
    let fixture = Fixture::new();
    let archive = fixture.path("test.tar");
    create(&archive, &fixture.root, &fixture.root).unwrap();

    let output = Command::new("tar").arg("-tf").arg(&archive).output().unwrap();
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout).unwrap(),
        "dir/\ndir/file.txt\ndir/sub/\ndir/sub/deep.txt\nempty/\nsym_link\nxattrs\n"
    );
}
