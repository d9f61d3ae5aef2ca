//! Trace archive access.
//!
//! An archive is either a directory or a gzip-compressed tar bundle with the
//! same relative layout. Bundles are decompressed into memory once; the
//! directory variant reads entries lazily.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tracelens_protocols::LoadError;

/// Leading bytes of every gzip stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// An opened trace archive.
#[derive(Debug)]
pub enum TraceArchive {
    /// Unpacked archive on disk.
    Directory(PathBuf),
    /// Decompressed bundle held in memory, keyed by normalised entry name.
    Bundle(HashMap<String, Vec<u8>>),
}

impl TraceArchive {
    /// Open the archive at `path`.
    pub fn open(path: &Path, cancel: &CancellationToken) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.display().to_string()));
        }

        if path.is_dir() {
            debug!("Opening trace directory {}", path.display());
            return Ok(TraceArchive::Directory(path.to_path_buf()));
        }

        let bytes = fs::read(path)?;
        if !bytes.starts_with(&GZIP_MAGIC) {
            return Err(LoadError::malformed(format!(
                "{} is neither a directory nor a gzip tar bundle",
                path.display()
            )));
        }

        debug!("Opening trace bundle {} ({} bytes)", path.display(), bytes.len());
        Self::from_bundle_bytes(&bytes, cancel)
    }

    /// Decompress a `.tar.gz` bundle into memory.
    pub fn from_bundle_bytes(bytes: &[u8], cancel: &CancellationToken) -> Result<Self, LoadError> {
        let decoder = GzDecoder::new(bytes);
        let mut archive = Archive::new(decoder);
        let mut entries = HashMap::new();

        let iter = archive.entries().map_err(bundle_error)?;
        for entry in iter {
            if cancel.is_cancelled() {
                return Err(LoadError::Cancelled);
            }

            let mut entry = entry.map_err(bundle_error)?;
            if !entry.header().entry_type().is_file() {
                continue;
            }

            let name = {
                let path = entry.path().map_err(bundle_error)?;
                normalize_entry_name(&path.to_string_lossy())
            };
            let mut data = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
            entry.read_to_end(&mut data).map_err(bundle_error)?;
            entries.insert(name, data);
        }

        Ok(TraceArchive::Bundle(entries))
    }

    /// Short description used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TraceArchive::Directory(_) => "directory",
            TraceArchive::Bundle(_) => "bundle",
        }
    }

    /// Read an entry by archive-relative name. Missing entries yield `None`.
    pub fn read(&self, name: &str) -> Result<Option<Vec<u8>>, LoadError> {
        let name = normalize_entry_name(name);
        match self {
            TraceArchive::Directory(root) => {
                let relative = Path::new(&name);
                if relative
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)))
                {
                    return Err(LoadError::malformed(format!(
                        "entry '{}' escapes the archive root",
                        name
                    )));
                }
                match fs::read(root.join(relative)) {
                    Ok(bytes) => Ok(Some(bytes)),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(LoadError::Io(e)),
                }
            }
            TraceArchive::Bundle(entries) => Ok(entries.get(&name).cloned()),
        }
    }
}

fn bundle_error(err: io::Error) -> LoadError {
    LoadError::malformed(format!("unreadable bundle: {}", err))
}

/// Strip leading `./` and `/` so bundle and directory names agree.
fn normalize_entry_name(name: &str) -> String {
    let mut name = name.replace('\\', "/");
    loop {
        if let Some(rest) = name.strip_prefix("./") {
            name = rest.to_string();
        } else if let Some(rest) = name.strip_prefix('/') {
            name = rest.to_string();
        } else {
            return name;
        }
    }
}
