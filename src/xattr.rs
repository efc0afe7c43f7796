//! Extended attribute access.
//!
//! Attributes are always read and written with the link-aware syscalls, so a symlink's own
//! attributes are archived rather than those of its target.
//!
//! Both the name list and each value are fetched with the same two-phase protocol: query the
//! required buffer size, then fetch into a buffer of exactly that size.  If the two observations
//! disagree the attributes were modified concurrently and retrieval fails with
//! [`Error::XattrsChanged`].  There is no retry: a silently truncated or stale attribute map would
//! corrupt the preserved metadata.

use std::{
    collections::BTreeMap,
    ffi::{OsStr, OsString},
    io,
    os::unix::ffi::OsStrExt,
    path::Path,
};

use log::trace;
use rustix::{
    fs::{lgetxattr, llistxattr, lsetxattr, XattrFlags},
    io::Errno,
};

use crate::error::{Error, IoContext, Result};

/// Extended attributes of one filesystem object, keyed by namespace-qualified name.
pub type Xattrs = BTreeMap<OsString, Vec<u8>>;

/// The raw size-query/fetch calls behind [`get_all_xattrs`].
///
/// Each call follows the kernel convention: an empty buffer asks for the required size, a
/// non-empty buffer is filled and the number of bytes stored is returned.
pub trait XattrSource {
    fn list(&self, path: &Path, list: &mut [u8]) -> io::Result<usize>;
    fn get(&self, path: &Path, name: &OsStr, value: &mut [u8]) -> io::Result<usize>;
}

/// `llistxattr(2)` and `lgetxattr(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkXattrs;

impl XattrSource for LinkXattrs {
    fn list(&self, path: &Path, list: &mut [u8]) -> io::Result<usize> {
        Ok(llistxattr(path, list)?)
    }

    fn get(&self, path: &Path, name: &OsStr, value: &mut [u8]) -> io::Result<usize> {
        Ok(lgetxattr(path, name, value)?)
    }
}

/// Queries the required size with an empty buffer, then fetches into a buffer of exactly that
/// size.  A zero size is returned as an empty buffer without a second call.
fn fetch_two_phase(
    path: &Path,
    mut call: impl FnMut(&mut [u8]) -> io::Result<usize>,
) -> Result<Vec<u8>> {
    let size = call(&mut []).at(path)?;
    let mut buffer = vec![0u8; size];
    if size == 0 {
        return Ok(buffer);
    }

    match call(&mut buffer) {
        Ok(fetched) if fetched == size => Ok(buffer),
        Ok(_) => Err(Error::XattrsChanged { path: path.into() }),
        // the buffer we sized from the first query is now too small
        Err(e) if Errno::from_io_error(&e) == Some(Errno::RANGE) => {
            Err(Error::XattrsChanged { path: path.into() })
        }
        Err(e) => Err(e).at(path),
    }
}

/// Splits a NUL-terminated name list.  The empty token after the final terminator is not a name.
fn split_names(list: &[u8]) -> impl Iterator<Item = &OsStr> {
    let list = list.strip_suffix(b"\0").unwrap_or(list);
    list.split(|c| *c == 0).map(OsStr::from_bytes)
}

pub fn get_all_xattrs_with(source: &impl XattrSource, path: &Path) -> Result<Xattrs> {
    let mut xattrs = Xattrs::new();

    let names = fetch_two_phase(path, |buf| source.list(path, buf))?;
    if names.is_empty() {
        return Ok(xattrs);
    }

    for name in split_names(&names) {
        let value = fetch_two_phase(path, |buf| source.get(path, name, buf))?;
        if value.is_empty() {
            return Err(Error::EmptyXattrValue {
                path: path.into(),
                name: name.into(),
            });
        }
        trace!("{path:?}: xattr {name:?} ({} bytes)", value.len());
        xattrs.insert(name.into(), value);
    }

    Ok(xattrs)
}

/// Retrieves all extended attributes of a file, directory or symbolic link (the link itself).
///
/// An object without extended attributes yields an empty map, not an error.
pub fn get_all_xattrs(path: impl AsRef<Path>) -> Result<Xattrs> {
    get_all_xattrs_with(&LinkXattrs, path.as_ref())
}

/// Sets every attribute in `xattrs` on `path`.  The first failure aborts and is returned.
pub fn set_all_xattrs(path: impl AsRef<Path>, xattrs: &Xattrs) -> Result<()> {
    let path = path.as_ref();
    for (name, value) in xattrs {
        lsetxattr(path, name.as_os_str(), value, XattrFlags::empty()).at(path)?;
    }
    Ok(())
}
