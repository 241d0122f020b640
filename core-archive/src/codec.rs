//! Synchronous read-once / write-once archive handles
//!
//! Both handles work on in-memory buffers and are meant to run on the
//! blocking pool.

use std::io::{Cursor, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{ArchiveError, Result};
use crate::format::ArchiveFormat;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Largest member [`ArchiveReader`] accepts unless configured otherwise
pub const DEFAULT_MAX_ENTRY_SIZE: u64 = 512 * 1024 * 1024;

/// Upper bound on buffer space reserved from a size the archive declares
const PREALLOC_LIMIT: u64 = 1024 * 1024;

/// One decoded archive member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Relative POSIX path inside the archive
    pub path: String,
    pub is_directory: bool,
    pub data: Vec<u8>,
}

/// Clean an entry name into a relative POSIX path.
///
/// Absolute names and `..` segments are rejected since they would land
/// outside the extraction root.
pub(crate) fn sanitize_entry_path(raw: &str) -> Result<String> {
    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(ArchiveError::Corrupt(format!("absolute entry path {raw}")));
    }

    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(ArchiveError::Corrupt(format!(
                    "entry path {raw} escapes the archive root"
                )))
            }
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

// ============================================================================
// Reader
// ============================================================================

/// Read-once archive handle, consumed by [`ArchiveReader::into_entries`]
///
/// Members larger than the entry limit, whether declared or actually
/// decoded, fail with [`ArchiveError::Corrupt`].
pub struct ArchiveReader {
    format: ArchiveFormat,
    bytes: Bytes,
    max_entry_size: u64,
}

impl ArchiveReader {
    pub fn new(bytes: Bytes, format: ArchiveFormat) -> Self {
        Self {
            format,
            bytes,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
        }
    }

    pub fn with_max_entry_size(mut self, max_entry_size: u64) -> Self {
        self.max_entry_size = max_entry_size;
        self
    }

    /// Decode every member in archive order
    pub fn into_entries(self) -> Result<Vec<ArchiveEntry>> {
        let limit = self.max_entry_size;
        match self.format {
            ArchiveFormat::Zip => read_zip(self.bytes, limit),
            ArchiveFormat::Tar { .. } => {
                // gzip is detected from content, not from the suffix
                if self.bytes.starts_with(&GZIP_MAGIC) {
                    read_tar(GzDecoder::new(Cursor::new(self.bytes)), limit)
                } else {
                    read_tar(Cursor::new(self.bytes), limit)
                }
            }
        }
    }
}

/// Read one member, trusting its declared size only up to `limit`
fn read_member<R: Read>(reader: R, path: &str, declared: u64, limit: u64) -> Result<Vec<u8>> {
    if declared > limit {
        return Err(ArchiveError::Corrupt(format!(
            "entry {path} declares {declared} bytes, limit is {limit}"
        )));
    }

    let mut data = Vec::with_capacity(declared.min(PREALLOC_LIMIT) as usize);
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut data)
        .map_err(ArchiveError::corrupt)?;
    if data.len() as u64 > limit {
        return Err(ArchiveError::Corrupt(format!(
            "entry {path} exceeds the {limit} byte limit"
        )));
    }
    Ok(data)
}

fn read_zip(bytes: Bytes, limit: u64) -> Result<Vec<ArchiveEntry>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(ArchiveError::corrupt)?;
    let mut entries = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let mut file = archive.by_index(index).map_err(ArchiveError::corrupt)?;
        let path = sanitize_entry_path(file.name())?;
        if path.is_empty() {
            continue;
        }

        if file.is_dir() {
            entries.push(ArchiveEntry {
                path,
                is_directory: true,
                data: Vec::new(),
            });
            continue;
        }

        let declared = file.size();
        let data = read_member(&mut file, &path, declared, limit)?;
        entries.push(ArchiveEntry {
            path,
            is_directory: false,
            data,
        });
    }

    Ok(entries)
}

fn read_tar<R: Read>(reader: R, limit: u64) -> Result<Vec<ArchiveEntry>> {
    let mut archive = tar::Archive::new(reader);
    let mut entries = Vec::new();

    for entry in archive.entries().map_err(ArchiveError::corrupt)? {
        let mut entry = entry.map_err(ArchiveError::corrupt)?;
        let raw = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let path = sanitize_entry_path(&raw)?;
        if path.is_empty() {
            continue;
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            entries.push(ArchiveEntry {
                path,
                is_directory: true,
                data: Vec::new(),
            });
        } else if entry_type.is_file() || entry_type.is_contiguous() {
            let declared = entry.header().size().map_err(ArchiveError::corrupt)?;
            let data = read_member(&mut entry, &path, declared, limit)?;
            entries.push(ArchiveEntry {
                path,
                is_directory: false,
                data,
            });
        }
        // links and device nodes have no counterpart in a storage tree
    }

    Ok(entries)
}

// ============================================================================
// Writer
// ============================================================================

enum WriterInner {
    Zip(ZipWriter<Cursor<Vec<u8>>>),
    Tar(tar::Builder<Vec<u8>>),
    TarGz(tar::Builder<GzEncoder<Vec<u8>>>),
}

/// Write-once archive handle, consumed by [`ArchiveWriter::finish`]
pub struct ArchiveWriter {
    inner: WriterInner,
    entries: usize,
}

impl ArchiveWriter {
    pub fn new(format: ArchiveFormat) -> Self {
        let inner = match format {
            ArchiveFormat::Zip => WriterInner::Zip(ZipWriter::new(Cursor::new(Vec::new()))),
            ArchiveFormat::Tar { gzip: false } => WriterInner::Tar(tar::Builder::new(Vec::new())),
            ArchiveFormat::Tar { gzip: true } => WriterInner::TarGz(tar::Builder::new(
                GzEncoder::new(Vec::new(), Compression::default()),
            )),
        };
        Self { inner, entries: 0 }
    }

    /// Number of members written so far
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Append one file member
    pub fn write_entry(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let path = sanitize_entry_path(path)?;
        if path.is_empty() {
            return Err(ArchiveError::Corrupt("empty entry path".to_string()));
        }

        match &mut self.inner {
            WriterInner::Zip(writer) => {
                writer
                    .start_file(path.as_str(), zip_options())
                    .map_err(ArchiveError::encode)?;
                writer.write_all(data).map_err(ArchiveError::encode)?;
            }
            WriterInner::Tar(builder) => append_tar_file(builder, &path, data)?,
            WriterInner::TarGz(builder) => append_tar_file(builder, &path, data)?,
        }
        self.entries += 1;
        Ok(())
    }

    /// Append an explicit directory member
    pub fn write_directory(&mut self, path: &str) -> Result<()> {
        let path = sanitize_entry_path(path)?;
        if path.is_empty() {
            return Ok(());
        }

        match &mut self.inner {
            WriterInner::Zip(writer) => {
                writer
                    .add_directory(path.clone(), zip_options())
                    .map_err(ArchiveError::encode)?;
            }
            WriterInner::Tar(builder) => append_tar_directory(builder, &path)?,
            WriterInner::TarGz(builder) => append_tar_directory(builder, &path)?,
        }
        self.entries += 1;
        Ok(())
    }

    /// Finalize the archive and return its bytes
    pub fn finish(self) -> Result<Vec<u8>> {
        match self.inner {
            WriterInner::Zip(writer) => Ok(writer.finish().map_err(ArchiveError::encode)?.into_inner()),
            WriterInner::Tar(builder) => builder.into_inner().map_err(ArchiveError::encode),
            WriterInner::TarGz(builder) => builder
                .into_inner()
                .and_then(|encoder| encoder.finish())
                .map_err(ArchiveError::encode),
        }
    }
}

fn zip_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn append_tar_file<W: Write>(builder: &mut tar::Builder<W>, path: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(now_secs());
    builder
        .append_data(&mut header, path, data)
        .map_err(ArchiveError::encode)
}

fn append_tar_directory<W: Write>(builder: &mut tar::Builder<W>, path: &str) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_size(0);
    header.set_mode(0o755);
    header.set_mtime(now_secs());
    builder
        .append_data(&mut header, format!("{path}/"), std::io::empty())
        .map_err(ArchiveError::encode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(format: ArchiveFormat) -> Vec<ArchiveEntry> {
        let mut writer = ArchiveWriter::new(format);
        writer.write_directory("tests").unwrap();
        writer.write_entry("tests/01.in", b"1 2\n").unwrap();
        writer.write_entry("config.json", b"{}").unwrap();
        assert_eq!(writer.len(), 3);

        let bytes = writer.finish().unwrap();
        ArchiveReader::new(Bytes::from(bytes), format)
            .into_entries()
            .unwrap()
    }

    #[test]
    fn test_sanitize_entry_path() {
        assert_eq!(sanitize_entry_path("./a//b.txt").unwrap(), "a/b.txt");
        assert_eq!(sanitize_entry_path("dir/").unwrap(), "dir");
        assert_eq!(sanitize_entry_path("win\\style.txt").unwrap(), "win/style.txt");
        assert!(sanitize_entry_path("/etc/passwd").is_err());
        assert!(sanitize_entry_path("a/../../b").is_err());
    }

    #[test]
    fn test_zip_members() {
        let entries = round_trip(ArchiveFormat::Zip);
        let files: Vec<_> = entries.iter().filter(|e| !e.is_directory).collect();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "tests/01.in");
        assert_eq!(files[0].data, b"1 2\n");
        assert!(entries.iter().any(|e| e.is_directory && e.path == "tests"));
    }

    #[test]
    fn test_tar_members_carry_sizes() {
        for format in [ArchiveFormat::TAR, ArchiveFormat::TAR_GZ] {
            let entries = round_trip(format);
            let config = entries.iter().find(|e| e.path == "config.json").unwrap();
            assert_eq!(config.data, b"{}");
            assert!(entries.iter().any(|e| e.is_directory && e.path == "tests"));
        }
    }

    #[test]
    fn test_gzip_sniffed_for_plain_tar_name() {
        let mut writer = ArchiveWriter::new(ArchiveFormat::TAR_GZ);
        writer.write_entry("a.txt", b"a").unwrap();
        let bytes = writer.finish().unwrap();

        let entries = ArchiveReader::new(Bytes::from(bytes), ArchiveFormat::TAR)
            .into_entries()
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data, b"a");
    }

    #[test]
    fn test_entry_limit() {
        for format in [ArchiveFormat::Zip, ArchiveFormat::TAR, ArchiveFormat::TAR_GZ] {
            let mut writer = ArchiveWriter::new(format);
            writer.write_entry("big.bin", &[7u8; 64]).unwrap();
            let bytes = Bytes::from(writer.finish().unwrap());

            let entries = ArchiveReader::new(bytes.clone(), format)
                .with_max_entry_size(64)
                .into_entries()
                .unwrap();
            assert_eq!(entries[0].data.len(), 64);

            let err = ArchiveReader::new(bytes, format)
                .with_max_entry_size(63)
                .into_entries()
                .unwrap_err();
            assert!(matches!(err, ArchiveError::Corrupt(_)), "{format}: {err}");
        }
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let err = ArchiveReader::new(Bytes::from_static(b"definitely not a zip"), ArchiveFormat::Zip)
            .into_entries()
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Corrupt(_)));
    }
}
