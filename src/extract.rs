//! Archive extraction.
//!
//! Entries are dispatched on their [`EntryKind`] and restored one at a time, in stream order.
//! A failure aborts the whole extraction.  Whatever was already written stays in place: callers
//! must treat the destination as unusable and clean it up themselves.
//!
//! Character and block devices, as well as fifos, are restored as empty placeholder files.
//! Creating real device nodes would require privileges this library doesn't assume.

use std::{
    fs::{self, DirBuilder, File, OpenOptions, Permissions},
    io::{self, BufReader, Read},
    os::unix::fs::{chown, lchown, symlink, DirBuilderExt, OpenOptionsExt, PermissionsExt},
    path::{Component, Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use log::debug;
use rustix::fs::{
    fchmod, futimens, open, utimensat, AtFlags, Mode, OFlags, Timespec, Timestamps, CWD,
};
use tar::{Archive, Entry};

use crate::{
    digest::HashingReader,
    entry::{EntryKind, PAX_SCHILY_XATTR},
    error::{Error, IoContext, Result},
    util::Sha256Digest,
    xattr::{set_all_xattrs, Xattrs},
};

/// Settings for [`unpack`] and [`extract_with_options`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ExtractOptions {
    /// Restore the uid/gid recorded in the archive.  Unprivileged callers extracting foreign
    /// archives will want to turn this off.
    pub preserve_ownership: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            preserve_ownership: true,
        }
    }
}

impl ExtractOptions {
    pub fn preserve_ownership(mut self, preserve: bool) -> Self {
        self.preserve_ownership = preserve;
        self
    }
}

/// Header fields restored after an object is created.
#[derive(Debug, Clone, Copy)]
struct Stat {
    mode: u32,
    uid: u32,
    gid: u32,
    mtime: i64,
}

impl Stat {
    fn from_header(name: &Path, header: &tar::Header) -> Result<Self> {
        Ok(Stat {
            mode: header.mode().at(name)? & 0o7777,
            uid: owner_id(name, header.uid().at(name)?)?,
            gid: owner_id(name, header.gid().at(name)?)?,
            mtime: header.mtime().at(name)? as i64,
        })
    }
}

fn owner_id(name: &Path, id: u64) -> Result<u32> {
    u32::try_from(id).map_err(|_| Error::IdOutOfRange {
        path: name.into(),
        id,
    })
}

/// What the access time is set to alongside the recorded modification time.
#[derive(Debug, Clone, Copy)]
enum AccessTime {
    Now,
    Mtime,
}

fn timestamps(stat: &Stat, access: AccessTime) -> Timestamps {
    let last_access = match access {
        AccessTime::Now => {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            Timespec {
                tv_sec: now.as_secs() as _,
                tv_nsec: now.subsec_nanos() as _,
            }
        }
        AccessTime::Mtime => Timespec {
            tv_sec: stat.mtime as _,
            tv_nsec: 0,
        },
    };
    Timestamps {
        last_access,
        last_modification: Timespec {
            tv_sec: stat.mtime as _,
            tv_nsec: 0,
        },
    }
}

fn set_times(path: &Path, stat: &Stat, access: AccessTime, flags: AtFlags) -> Result<()> {
    utimensat(CWD, path, &timestamps(stat, access), flags).at(path)
}

struct Extractor<'a> {
    dest: &'a Path,
    canonical_dest: PathBuf,
    options: &'a ExtractOptions,
    /// Directory modes and mtimes, applied once the stream ends.  Children can't bump the mtime
    /// and a read-only directory can still be populated.
    deferred_dirs: Vec<(PathBuf, Stat)>,
}

impl Extractor<'_> {
    /// Maps an entry name below the destination.  Leading `/` is dropped; `..` is refused.
    fn resolve(&self, name: &Path) -> Result<PathBuf> {
        let mut path = self.dest.to_path_buf();
        for component in name.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
                Component::ParentDir => return Err(Error::UnsafePath { path: name.into() }),
            }
        }
        Ok(path)
    }

    /// Creates missing parent directories and makes sure they didn't lead us outside of the
    /// destination through a symlink extracted earlier.
    fn create_parents(&self, path: &Path) -> Result<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        fs::create_dir_all(parent).at(parent)?;
        if !fs::canonicalize(parent)
            .at(parent)?
            .starts_with(&self.canonical_dest)
        {
            return Err(Error::UnsafePath { path: path.into() });
        }
        Ok(())
    }

    fn restore_owner(&self, path: &Path, stat: &Stat, follow: bool) -> Result<()> {
        if !self.options.preserve_ownership {
            return Ok(());
        }
        let (uid, gid) = (Some(stat.uid), Some(stat.gid));
        match follow {
            true => chown(path, uid, gid),
            false => lchown(path, uid, gid),
        }
        .at(path)
    }

    fn restore_mode(&self, path: &Path, stat: &Stat) -> Result<()> {
        fs::set_permissions(path, Permissions::from_mode(stat.mode)).at(path)
    }

    /// Creates a directory, or reuses one that is already there.  An existing symlink is never
    /// followed: its target may lie outside of the destination.
    fn extract_dir(&mut self, path: &Path, stat: Stat, xattrs: &Xattrs) -> Result<()> {
        let path = if path == self.dest {
            // `./` describes the destination itself
            self.canonical_dest.clone()
        } else {
            self.create_parents(path)?;
            match fs::symlink_metadata(path) {
                Ok(metadata) if metadata.is_dir() => {}
                Ok(metadata) if metadata.is_symlink() => {
                    return Err(Error::UnsafePath { path: path.into() })
                }
                Ok(_) => return Err(io::Error::from(io::ErrorKind::AlreadyExists)).at(path),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    DirBuilder::new().mode(0o700).create(path).at(path)?
                }
                Err(e) => return Err(e).at(path),
            }
            path.to_owned()
        };
        self.restore_owner(&path, &stat, false)?;
        set_all_xattrs(&path, xattrs)?;
        self.deferred_dirs.push((path, stat));
        Ok(())
    }

    fn extract_symlink(&self, path: &Path, target: &Path, stat: Stat) -> Result<()> {
        self.create_parents(path)?;
        symlink(target, path).at(path)?;
        self.restore_owner(path, &stat, false)?;
        // Linux refuses user.* xattrs on symlinks, so they aren't restored here.
        set_times(path, &stat, AccessTime::Now, AtFlags::SYMLINK_NOFOLLOW)
    }

    fn extract_placeholder(&self, path: &Path, stat: Stat) -> Result<()> {
        self.create_parents(path)?;
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(stat.mode)
            .open(path)
            .at(path)?;
        self.restore_owner(path, &stat, true)?;
        self.restore_mode(path, &stat)?;
        set_times(path, &stat, AccessTime::Mtime, AtFlags::empty())
    }

    fn extract_file<R: Read>(
        &self,
        entry: &mut Entry<'_, R>,
        path: &Path,
        stat: Stat,
        xattrs: &Xattrs,
    ) -> Result<()> {
        self.create_parents(path)?;
        let declared = entry.header().size().at(path)?;
        let expected = entry.size();

        let mut file: File = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)
            .at(path)?;
        let written = io::copy(entry, &mut file).at(path)?;
        if written != expected || written != declared {
            return Err(Error::SizeMismatch {
                path: path.into(),
                expected,
                actual: written,
            });
        }
        drop(file);

        self.restore_owner(path, &stat, true)?;
        // xattrs first: user.* needs write permission, which the final mode may not grant
        set_all_xattrs(path, xattrs)?;
        self.restore_mode(path, &stat)?;
        set_times(path, &stat, AccessTime::Mtime, AtFlags::empty())
    }

    fn extract_entry<R: Read>(&mut self, entry: &mut Entry<'_, R>) -> Result<()> {
        let name = entry.path().map_err(Error::Read)?.into_owned();
        let link_name = entry
            .link_name()
            .map_err(Error::Read)?
            .map(|target| target.into_owned());
        let kind = EntryKind::from_tar(&name, entry.header().entry_type(), link_name)?;
        let stat = Stat::from_header(&name, entry.header())?;
        let xattrs = read_xattrs(entry)?;
        let path = self.resolve(&name)?;
        debug!("{name:?}: {kind:?}, {} xattrs", xattrs.len());

        match kind {
            EntryKind::Directory => self.extract_dir(&path, stat, &xattrs),
            EntryKind::Symlink { ref target } => self.extract_symlink(&path, target, stat),
            EntryKind::CharDevice | EntryKind::BlockDevice | EntryKind::Fifo => {
                self.extract_placeholder(&path, stat)
            }
            EntryKind::Regular => self.extract_file(entry, &path, stat, &xattrs),
        }
    }

    fn finish(self) -> Result<()> {
        for (path, stat) in self.deferred_dirs.iter().rev() {
            let flags = OFlags::RDONLY | OFlags::DIRECTORY | OFlags::NOFOLLOW | OFlags::CLOEXEC;
            let dir = open(path, flags, Mode::empty()).at(path)?;
            fchmod(&dir, Mode::from_raw_mode(stat.mode)).at(path)?;
            futimens(&dir, &timestamps(stat, AccessTime::Now)).at(path)?;
        }
        Ok(())
    }
}

/// Collects the `SCHILY.xattr.*` PAX records that precede an entry.
fn read_xattrs<R: Read>(entry: &mut Entry<'_, R>) -> Result<Xattrs> {
    let mut xattrs = Xattrs::new();
    if let Some(extensions) = entry.pax_extensions().map_err(Error::Read)? {
        for extension in extensions {
            let extension = extension.map_err(Error::Read)?;
            let key = extension
                .key()
                .map_err(|e| Error::Read(io::Error::new(io::ErrorKind::InvalidData, e)))?;
            if let Some(name) = key.strip_prefix(PAX_SCHILY_XATTR) {
                xattrs.insert(name.into(), extension.value_bytes().to_vec());
            }
        }
    }
    Ok(xattrs)
}

/// Restores every entry of `archive` below `dest`, until the end of the stream.
pub fn unpack<R: Read>(
    archive: &mut Archive<R>,
    dest: &Path,
    options: &ExtractOptions,
) -> Result<()> {
    fs::create_dir_all(dest).at(dest)?;
    let mut extractor = Extractor {
        dest,
        canonical_dest: fs::canonicalize(dest).at(dest)?,
        options,
        deferred_dirs: vec![],
    };

    for entry in archive.entries().map_err(Error::Read)? {
        let mut entry = entry.map_err(Error::Read)?;
        extractor.extract_entry(&mut entry)?;
    }

    extractor.finish()
}

pub fn extract_with_options(
    archive: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    options: &ExtractOptions,
) -> Result<()> {
    let archive = archive.as_ref();
    let file = File::open(archive).at(archive)?;
    unpack(&mut Archive::new(BufReader::new(file)), dest.as_ref(), options)
}

/// Extracts the tar archive at `archive` below `dest`.
pub fn extract(archive: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<()> {
    extract_with_options(archive, dest, &ExtractOptions::default())
}

/// Like [`extract`], returning the SHA-256 of the tar stream as it was read.
///
/// The footer following the last entry is read through the digest as well, so the result equals
/// the checksum returned by [`crate::create_with_checksum`] for the same archive.
pub fn extract_with_checksum(
    archive: impl AsRef<Path>,
    dest: impl AsRef<Path>,
) -> Result<Sha256Digest> {
    extract_with_checksum_options(archive, dest, &ExtractOptions::default())
}

pub fn extract_with_checksum_options(
    archive: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    options: &ExtractOptions,
) -> Result<Sha256Digest> {
    let archive = archive.as_ref();
    let file = File::open(archive).at(archive)?;

    let mut tar = Archive::new(HashingReader::new(BufReader::new(file)));
    unpack(&mut tar, dest.as_ref(), options)?;

    let mut tap = tar.into_inner();
    io::copy(&mut tap, &mut io::sink()).map_err(Error::Read)?;
    let (_, digest) = tap.finish();
    Ok(digest)
}

/// Returns true if the archive ends before its first entry.
pub fn is_empty(archive: impl AsRef<Path>) -> Result<bool> {
    let path = archive.as_ref();
    let mut archive = Archive::new(File::open(path).at(path)?);
    let empty = match archive.entries().at(path)?.next() {
        None => true,
        Some(Ok(_)) => false,
        Some(Err(e)) => return Err(e).at(path),
    };
    Ok(empty)
}
