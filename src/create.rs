//! Archive construction.
//!
//! The tree is walked depth-first in lexical order on a single thread, so an unchanged tree always
//! produces the same byte stream.  That is what makes [`create_with_checksum`] a content hash.

use std::{
    fs::{File, Metadata},
    io::{self, BufWriter, Read, Write},
    path::Path,
};

use log::debug;
use tar::Builder;
use walkdir::WalkDir;

use crate::{
    digest::HashingWriter,
    entry::{build_header, entry_name, EntryHeader, EntryKind},
    error::{Error, IoContext, Result},
    util::Sha256Digest,
};

/// Appends one object, its xattrs and (for regular files) its content to `builder`.
pub fn append_entry<W: Write>(
    builder: &mut Builder<W>,
    path: &Path,
    name: &Path,
    metadata: &Metadata,
) -> Result<()> {
    let entry = build_header(path, name.into(), metadata)?;
    debug!("{name:?}: {:?}, {} xattrs", entry.kind, entry.xattrs.len());

    if !entry.xattrs.is_empty() {
        let records = entry.pax_records(path)?;
        builder
            .append_pax_extensions(records.iter().map(|(key, value)| (key.as_str(), *value)))
            .at(path)?;
    }

    let EntryHeader {
        name,
        kind,
        mut header,
        ..
    } = entry;

    match kind {
        EntryKind::Symlink { target } => builder.append_link(&mut header, &name, target).at(path),
        EntryKind::Regular => append_content(builder, path, &name, &mut header),
        EntryKind::Directory | EntryKind::CharDevice | EntryKind::BlockDevice | EntryKind::Fifo => {
            builder.append_data(&mut header, &name, io::empty()).at(path)
        }
    }
}

/// Copies exactly the size recorded in the header.  A file that changed size since it was
/// stat()ed would leave the payload out of step with its header, so that is an error.
fn append_content<W: Write>(
    builder: &mut Builder<W>,
    path: &Path,
    name: &Path,
    header: &mut tar::Header,
) -> Result<()> {
    let expected = header.size().at(path)?;
    let file = File::open(path).at(path)?;

    let mut payload = file.take(expected);
    builder.append_data(header, name, &mut payload).at(path)?;

    let missing = payload.limit();
    let extra = payload.into_inner().read(&mut [0u8; 1]).at(path)?;
    if missing != 0 || extra != 0 {
        return Err(Error::SizeMismatch {
            path: path.into(),
            expected,
            actual: expected - missing + extra as u64,
        });
    }
    Ok(())
}

/// Walks `root` and appends every object below it, naming entries relative to `prefix`.
///
/// Objects whose name normalizes to nothing (the root itself, when `prefix` is the root) are
/// skipped.  The first error aborts the walk.
pub fn write_tree<W: Write>(builder: &mut Builder<W>, root: &Path, prefix: &Path) -> Result<()> {
    for item in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let item = item?;
        let metadata = item.metadata()?;
        let Some(name) = entry_name(item.path(), prefix, metadata.is_dir()) else {
            continue;
        };
        append_entry(builder, item.path(), &name, &metadata)?;
    }
    Ok(())
}

/// Writes the footer and flushes.  Relying on `Drop` for this would lose the error.
fn finish<W: Write>(builder: Builder<W>) -> Result<W> {
    let mut inner = builder.into_inner().map_err(Error::Finalize)?;
    inner.flush().map_err(Error::Finalize)?;
    Ok(inner)
}

/// Creates a tar archive at `archive` from the tree at `root`, stripping `prefix` from each
/// entry name.
pub fn create(
    archive: impl AsRef<Path>,
    root: impl AsRef<Path>,
    prefix: impl AsRef<Path>,
) -> Result<()> {
    let archive = archive.as_ref();
    let file = File::create(archive).at(archive)?;

    let mut builder = Builder::new(BufWriter::new(file));
    write_tree(&mut builder, root.as_ref(), prefix.as_ref())?;
    finish(builder)?;
    Ok(())
}

/// Like [`create`], returning the SHA-256 of the tar stream as it was written.
///
/// The digest covers the logical stream, not the file: it depends only on the archived entries,
/// not on when or where the archive was created.
pub fn create_with_checksum(
    archive: impl AsRef<Path>,
    root: impl AsRef<Path>,
    prefix: impl AsRef<Path>,
) -> Result<Sha256Digest> {
    let archive = archive.as_ref();
    let file = File::create(archive).at(archive)?;

    let mut builder = Builder::new(HashingWriter::new(BufWriter::new(file)));
    write_tree(&mut builder, root.as_ref(), prefix.as_ref())?;
    let (_, digest) = finish(builder)?.finish();
    Ok(digest)
}
