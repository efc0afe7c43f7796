use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use xtar::{parse_sha256, ExtractOptions};

/// xtar
#[derive(Debug, Parser)]
#[clap(name = "xtar", version)]
pub struct App {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Creates an archive from a directory tree, including extended attributes
    Create {
        archive: PathBuf,
        root: PathBuf,
        /// prefix removed from every entry name (defaults to the root)
        #[clap(long)]
        strip_prefix: Option<PathBuf>,
        /// print the sha256 of the tar stream
        #[clap(long)]
        checksum: bool,
    },
    /// Extracts an archive below a destination directory
    Extract {
        archive: PathBuf,
        dest: PathBuf,
        /// print the sha256 of the tar stream
        #[clap(long)]
        checksum: bool,
        /// fail unless the stream has this sha256 (implies --checksum)
        #[clap(long)]
        expect: Option<String>,
        /// don't restore the uid/gid recorded in the archive
        #[clap(long)]
        no_same_owner: bool,
    },
    /// Prints whether an archive contains no entries
    IsEmpty { archive: PathBuf },
    /// Lists the extended attributes of a path (not following symlinks)
    Xattrs { path: PathBuf },
}

fn main() -> Result<()> {
    env_logger::init();

    let args = App::parse();

    match args.cmd {
        Command::Create {
            ref archive,
            ref root,
            ref strip_prefix,
            checksum,
        } => {
            let prefix = strip_prefix.as_ref().unwrap_or(root);
            if checksum {
                let digest = xtar::create_with_checksum(archive, root, prefix)
                    .with_context(|| format!("Creating {archive:?}"))?;
                println!("{}", hex::encode(digest));
            } else {
                xtar::create(archive, root, prefix)
                    .with_context(|| format!("Creating {archive:?}"))?;
            }
        }
        Command::Extract {
            ref archive,
            ref dest,
            checksum,
            ref expect,
            no_same_owner,
        } => {
            let expected = expect
                .as_ref()
                .map(parse_sha256)
                .transpose()
                .context("Parsing --expect")?;

            let options = ExtractOptions::default().preserve_ownership(!no_same_owner);
            if checksum || expected.is_some() {
                let digest = xtar::extract_with_checksum_options(archive, dest, &options)
                    .with_context(|| format!("Extracting {archive:?}"))?;
                if let Some(expected) = expected {
                    if digest != expected {
                        bail!(
                            "Checksum mismatch: expected {}, got {}",
                            hex::encode(expected),
                            hex::encode(digest)
                        );
                    }
                }
                println!("{}", hex::encode(digest));
            } else {
                xtar::extract_with_options(archive, dest, &options)
                    .with_context(|| format!("Extracting {archive:?}"))?;
            }
        }
        Command::IsEmpty { ref archive } => {
            println!("{}", xtar::is_empty(archive)?);
        }
        Command::Xattrs { ref path } => {
            for (name, value) in xtar::get_all_xattrs(path)? {
                println!("{}={}", name.to_string_lossy(), hex::encode(value));
            }
        }
    }
    Ok(())
}
