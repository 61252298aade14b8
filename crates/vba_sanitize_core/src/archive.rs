//! ZIP container extraction and repacking.
//!
//! A container is unpacked into a [`StagingArea`] (a uniquely named temporary
//! directory that is removed when dropped), edited on disk, and serialized back
//! into a new archive with [`repack`]. The new archive is always written to a
//! temporary file next to its final destination so the caller can swap it into
//! place with a single rename.
//!
//! [`ContainerCodec`] is the seam the transaction uses to reach this module;
//! [`ZipCodec`] is the production implementation.

use crate::error::{Error, Result};
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read};
use tempfile::{TempDir, TempPath};
use tracing::debug;
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

const STAGING_PREFIX: &str = "vba-sanitize-";

/// Temporary on-disk copy of a container's entries.
///
/// The directory is owned exclusively by this value and deleted when it is
/// dropped, so every exit path of an operation releases it.
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
    root: Utf8PathBuf,
}

impl StagingArea {
    /// Create an empty staging directory, inside `parent` if given or the system
    /// temp directory otherwise.
    pub fn new_in(parent: Option<&Utf8Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGING_PREFIX);
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        let root =
            Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).map_err(Error::NonUtf8Path)?;

        Ok(Self { dir, root })
    }

    /// Absolute path of the staging directory.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Resolve an archive-style relative path (`xl/vbaProject.bin`) inside the
    /// staging directory.
    ///
    /// Fails with [`Error::UnsafeEntryPath`] if the path is absolute, empty or
    /// climbs out of the staging root.
    pub fn entry_path(&self, relative_path: &str) -> Result<Utf8PathBuf> {
        let relative = enclosed_relative_path(relative_path)
            .ok_or_else(|| Error::UnsafeEntryPath(relative_path.to_string()))?;
        Ok(self.root.join(relative))
    }

    /// Delete the staging directory now and surface any error instead of
    /// ignoring it on drop.
    pub fn close(self) -> Result<()> {
        self.dir.close()?;
        Ok(())
    }
}

/// Name and sizes of one entry, as stored in the central directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySummary {
    pub name: String,
    pub size: u64,
    pub compressed_size: u64,
    pub is_dir: bool,
}

/// How the transaction extracts and repacks containers.
pub trait ContainerCodec {
    /// Unpack every entry of `container` into a fresh [`StagingArea`].
    fn extract(&self, container: &Utf8Path) -> Result<StagingArea>;

    /// Serialize `staging` into a new container written next to `destination`.
    ///
    /// The returned [`TempPath`] deletes the file when dropped unless it is
    /// persisted.
    fn repack(&self, staging: &StagingArea, destination: &Utf8Path) -> Result<TempPath>;
}

/// Deflate-based ZIP codec.
#[derive(Debug, Clone, Default)]
pub struct ZipCodec {
    /// Deflate level; `None` uses the library default.
    pub compression_level: Option<i64>,
    /// Parent directory for staging areas; `None` uses the system temp dir.
    pub staging_root: Option<Utf8PathBuf>,
}

impl ZipCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression_level(mut self, level: Option<i64>) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_staging_root(mut self, staging_root: Option<Utf8PathBuf>) -> Self {
        self.staging_root = staging_root;
        self
    }
}

impl ContainerCodec for ZipCodec {
    fn extract(&self, container: &Utf8Path) -> Result<StagingArea> {
        extract(container, self.staging_root.as_deref())
    }

    fn repack(&self, staging: &StagingArea, destination: &Utf8Path) -> Result<TempPath> {
        repack(staging, destination, self.compression_level)
    }
}

fn open_archive(container: &Utf8Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(container)?;
    ZipArchive::new(BufReader::new(file)).map_err(|err| match err {
        ZipError::Io(io_err) => Error::Io(io_err),
        other => Error::ArchiveFormat(other),
    })
}

/// Extract every entry of `container` into a new staging directory.
pub fn extract(container: &Utf8Path, staging_root: Option<&Utf8Path>) -> Result<StagingArea> {
    let mut archive = open_archive(container)?;
    let staging = StagingArea::new_in(staging_root)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(Error::ArchiveFormat)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(Error::UnsafeEntryPath(entry.name().to_string()));
        };
        let output_path = staging.root().as_std_path().join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&output_path)?;
            continue;
        }

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&output_path)?;
        let written = io::copy(&mut entry, &mut outfile)?;
        debug!(entry = entry.name(), bytes = written, "extracted entry");
    }

    debug!(
        container = %container,
        staging = %staging.root(),
        entries = archive.len(),
        "extracted container"
    );
    Ok(staging)
}

/// Write every regular file under `staging` into a new deflate-compressed ZIP.
///
/// Entries are written in byte-wise lexicographic order of their `/`-separated
/// relative path with a fixed timestamp, so the same staging tree always
/// produces the same archive. The archive lands in a temporary file in
/// `destination`'s directory; `destination` itself is never touched.
pub fn repack(
    staging: &StagingArea,
    destination: &Utf8Path,
    compression_level: Option<i64>,
) -> Result<TempPath> {
    let files = collect_staged_files(staging.root())?;

    let parent = match destination.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let file_name = destination.file_name().unwrap_or("container");
    let (file, temp_path) = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(parent)?
        .into_parts();

    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(compression_level)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    for (name, path) in &files {
        zip.start_file(name.as_str(), options).map_err(Error::Zip)?;
        let mut source = File::open(path)?;
        io::copy(&mut source, &mut zip)?;
    }

    let writer = zip.finish().map_err(Error::Zip)?;
    let file = writer.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()?;

    debug!(
        destination = %destination,
        output = %temp_path.display(),
        entries = files.len(),
        "repacked container"
    );
    Ok(temp_path)
}

/// Read a single entry straight from a container, without staging.
///
/// Returns `Ok(None)` if the archive has no entry with that name.
pub fn read_entry(container: &Utf8Path, entry_name: &str) -> Result<Option<Vec<u8>>> {
    let mut archive = open_archive(container)?;
    let mut entry = match archive.by_name(entry_name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(Error::ArchiveFormat(err)),
    };

    let mut buffer = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut buffer)?;
    Ok(Some(buffer))
}

/// List the entries of a container in central directory order.
pub fn list_entries(container: &Utf8Path) -> Result<Vec<EntrySummary>> {
    let mut archive = open_archive(container)?;
    let mut entries = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i).map_err(Error::ArchiveFormat)?;
        entries.push(EntrySummary {
            name: entry.name().to_string(),
            size: entry.size(),
            compressed_size: entry.compressed_size(),
            is_dir: entry.is_dir(),
        });
    }

    Ok(entries)
}

/// Collect `(entry_name, absolute_path)` for every regular file, sorted by name.
fn collect_staged_files(root: &Utf8Path) -> Result<Vec<(String, Utf8PathBuf)>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root.as_std_path()) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = Utf8PathBuf::from_path_buf(entry.into_path()).map_err(Error::NonUtf8Path)?;
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join("/");
        files.push((name, path));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Normalize an archive-style path, rejecting anything that is not a plain
/// sequence of normal components.
fn enclosed_relative_path(name: &str) -> Option<Utf8PathBuf> {
    let normalized = name.replace('\\', "/");
    let mut relative = Utf8PathBuf::new();

    for component in Utf8Path::new(&normalized).components() {
        match component {
            Utf8Component::Normal(part) => relative.push(part),
            Utf8Component::CurDir => {}
            _ => return None,
        }
    }

    if relative.as_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}
