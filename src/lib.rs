//! Tar archives that carry extended attributes, with content hashes over the tar stream.
//!
//! Archives are written with the `tar` crate; xattrs travel as `SCHILY.xattr.*` PAX records in
//! front of the entry they belong to, the same encoding GNU tar and libarchive use.  Because the
//! tree is walked in a fixed order, [`create_with_checksum`] produces a digest that depends only
//! on the archived content, and [`extract_with_checksum`] reproduces it when reading the archive
//! back.

pub mod create;
pub mod digest;
pub mod entry;
pub mod error;
pub mod extract;
pub mod util;
pub mod xattr;


pub use create::{create, create_with_checksum, write_tree};
pub use error::{Error, Result};
pub use extract::{
    extract, extract_with_checksum, extract_with_checksum_options, extract_with_options, is_empty,
    unpack, ExtractOptions,
};
pub use util::{parse_sha256, Sha256Digest};
pub use xattr::{get_all_xattrs, set_all_xattrs, Xattrs};
