//! Per-entry naming and header construction.

use std::{
    ffi::OsString,
    fs::{self, FileType, Metadata},
    os::unix::{
        ffi::{OsStrExt, OsStringExt},
        fs::{FileTypeExt, MetadataExt},
    },
    path::{Path, PathBuf},
};

use tar::{EntryType, Header, HeaderMode};

use crate::{
    error::{Error, IoContext, Result},
    xattr::{get_all_xattrs, Xattrs},
};

/// PAX record prefix under which extended attributes travel.
pub(crate) const PAX_SCHILY_XATTR: &str = "SCHILY.xattr.";

/// The kinds of filesystem objects an archive can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Regular,
    Symlink { target: PathBuf },
    CharDevice,
    BlockDevice,
    Fifo,
}

impl EntryKind {
    /// Classifies an object found on disk.  Sockets have no tar representation.
    pub fn from_file_type(path: &Path, file_type: FileType) -> Result<Self> {
        let kind = if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::Regular
        } else if file_type.is_symlink() {
            EntryKind::Symlink {
                target: fs::read_link(path).at(path)?,
            }
        } else if file_type.is_char_device() {
            EntryKind::CharDevice
        } else if file_type.is_block_device() {
            EntryKind::BlockDevice
        } else if file_type.is_fifo() {
            EntryKind::Fifo
        } else {
            return Err(Error::Unrepresentable { path: path.into() });
        };
        Ok(kind)
    }

    /// Classifies an archive entry.  Hard links and the codec's internal types are not restorable.
    pub fn from_tar(path: &Path, entry_type: EntryType, link_name: Option<PathBuf>) -> Result<Self> {
        let kind = match entry_type {
            EntryType::Regular | EntryType::Continuous => EntryKind::Regular,
            EntryType::Directory => EntryKind::Directory,
            EntryType::Symlink => EntryKind::Symlink {
                target: link_name.ok_or_else(|| Error::UnsupportedEntry {
                    path: path.into(),
                    kind: "symlink without a target".into(),
                })?,
            },
            EntryType::Char => EntryKind::CharDevice,
            EntryType::Block => EntryKind::BlockDevice,
            EntryType::Fifo => EntryKind::Fifo,
            other => {
                return Err(Error::UnsupportedEntry {
                    path: path.into(),
                    kind: format!("{other:?}"),
                })
            }
        };
        Ok(kind)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, EntryKind::Directory)
    }
}

/// Turns a visited path into its archive-relative name.
///
/// `prefix` is stripped byte-wise, then a single leading `/`.  Directories get a trailing `/`.
/// `None` means the path normalizes to the root itself and gets no entry of its own.
pub fn entry_name(path: &Path, prefix: &Path, is_dir: bool) -> Option<PathBuf> {
    let path = path.as_os_str().as_bytes();
    let name = path
        .strip_prefix(prefix.as_os_str().as_bytes())
        .unwrap_or(path);
    if name.is_empty() || name == b"/" {
        return None;
    }

    let mut name = name.strip_prefix(b"/").unwrap_or(name).to_vec();
    if is_dir && !name.ends_with(b"/") {
        name.push(b'/');
    }
    Some(OsString::from_vec(name).into())
}

/// Everything needed to append one object to an archive.
#[derive(Debug)]
pub struct EntryHeader {
    pub name: PathBuf,
    pub kind: EntryKind,
    pub header: Header,
    pub xattrs: Xattrs,
}

impl EntryHeader {
    /// The xattrs as PAX records, in name order.
    pub(crate) fn pax_records(&self, path: &Path) -> Result<Vec<(String, &[u8])>> {
        self.xattrs
            .iter()
            .map(|(name, value)| {
                let name = name.to_str().ok_or_else(|| Error::InvalidXattrName {
                    path: path.into(),
                    name: name.clone(),
                })?;
                Ok((format!("{PAX_SCHILY_XATTR}{name}"), value.as_slice()))
            })
            .collect()
    }
}

/// Builds the header for the object at `path` from its (non-following) metadata and xattrs.
///
/// The name and, for symlinks, the target are written by the builder's append calls, which emit
/// long-name records when they don't fit into the header.
pub fn build_header(path: &Path, name: PathBuf, metadata: &Metadata) -> Result<EntryHeader> {
    let kind = EntryKind::from_file_type(path, metadata.file_type())?;

    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(metadata, HeaderMode::Complete);
    header.set_mode(metadata.mode() & 0o7777);
    if kind != EntryKind::Regular {
        header.set_size(0);
    }

    let xattrs = get_all_xattrs(path)?;

    Ok(EntryHeader {
        name,
        kind,
        header,
        xattrs,
    })
}
