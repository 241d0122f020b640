//! Round trips between storage trees and archives

use bridge_desktop::TempStorage;
use bridge_traits::StorageBackend;
use bytes::Bytes;
use core_archive::{
    create_archive, extract_all, extract_all_with_limit, extract_named, ArchiveError,
    ArchiveFormat, ArchiveStorage, ArchiveWriter,
};

async fn sample_tree() -> TempStorage {
    let storage = TempStorage::new().unwrap();
    storage
        .write_all("config.json", Bytes::from(r#"{"files":{"sol.cpp":"compile"}}"#))
        .await
        .unwrap();
    storage
        .write_all("sol.cpp", Bytes::from("int main() { return 0; }\n"))
        .await
        .unwrap();
    storage
        .write_all("tests/01.in", Bytes::from("1 2\n"))
        .await
        .unwrap();
    storage
        .write_all("tests/01.out", Bytes::from("3\n"))
        .await
        .unwrap();
    storage
        .write_all("tests/deep/nested/blob.bin", Bytes::from(vec![0u8, 159, 146, 150, 255]))
        .await
        .unwrap();
    storage.create_dir_all("empty").await.unwrap();
    storage
}

async fn snapshot(storage: &TempStorage) -> Vec<(String, bool, Vec<u8>)> {
    let mut records = storage.list_all("").await.unwrap();
    records.sort_by(|a, b| a.path.cmp(&b.path));

    let mut tree = Vec::new();
    for record in records {
        let data = if record.is_directory {
            Vec::new()
        } else {
            storage.read_all(&record.path).await.unwrap().to_vec()
        };
        tree.push((record.path, record.is_directory, data));
    }
    tree
}

#[tokio::test]
async fn test_round_trip_every_format() {
    let source = sample_tree().await;
    let expected = snapshot(&source).await;

    for format in [ArchiveFormat::Zip, ArchiveFormat::TAR, ArchiveFormat::TAR_GZ] {
        let archive = create_archive(&source, format).await.unwrap();

        let destination = TempStorage::new().unwrap();
        let summary = extract_all(archive, format, &destination).await.unwrap();

        assert_eq!(summary.files, 5, "format {format}");
        assert_eq!(snapshot(&destination).await, expected, "format {format}");
        destination.close().await.unwrap();
    }

    source.close().await.unwrap();
}

#[tokio::test]
async fn test_extract_named_infers_from_suffix() {
    let source = sample_tree().await;
    let archive = create_archive(&source, ArchiveFormat::TAR_GZ).await.unwrap();

    let destination = TempStorage::new().unwrap();
    extract_named(archive, Some("bundle.tgz"), None, &destination)
        .await
        .unwrap();
    assert_eq!(
        destination.read_all("tests/01.out").await.unwrap(),
        Bytes::from("3\n")
    );
}

#[tokio::test]
async fn test_extract_named_rejects_unknown_suffix() {
    let destination = TempStorage::new().unwrap();
    let err = extract_named(Bytes::from_static(b"data"), Some("bundle.exe"), None, &destination)
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::UnsupportedFormat(_)));
    assert!(destination.list_all("").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_escaping_entry_is_rejected() {
    let mut writer = ArchiveWriter::new(ArchiveFormat::Zip);
    writer.write_entry("ok.txt", b"fine").unwrap();
    let mut bytes = writer.finish().unwrap();

    // rewrite the stored name in place (same length) to climb out of the root
    let needle = b"ok.txt";
    let replacement = b"../x.t";
    let mut i = 0;
    while i + needle.len() <= bytes.len() {
        if &bytes[i..i + needle.len()] == needle {
            bytes[i..i + needle.len()].copy_from_slice(replacement);
        }
        i += 1;
    }

    let destination = TempStorage::new().unwrap();
    let err = extract_all(Bytes::from(bytes), ArchiveFormat::Zip, &destination)
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::Corrupt(_)));
}

#[tokio::test]
async fn test_archive_storage_extract_and_compress() {
    let dir = tempfile::tempdir().unwrap();
    let archive_path = dir.path().join("bundle.zip");

    let source = sample_tree().await;
    let bytes = create_archive(&source, ArchiveFormat::Zip).await.unwrap();
    tokio::fs::write(&archive_path, &bytes).await.unwrap();

    let storage = ArchiveStorage::open(&archive_path, None).unwrap();
    assert_eq!(storage.format(), ArchiveFormat::Zip);

    let summary = storage.extract_all().await.unwrap();
    assert_eq!(summary.files, 5);

    storage
        .write_all("tests/02.in", Bytes::from("5 6\n"))
        .await
        .unwrap();
    storage.compress_all().await.unwrap();
    storage.close().await.unwrap();

    let reopened = ArchiveStorage::open(&archive_path, None).unwrap();
    reopened.extract_all().await.unwrap();
    assert_eq!(
        reopened.read_all("tests/02.in").await.unwrap(),
        Bytes::from("5 6\n")
    );
}

#[tokio::test]
async fn test_archive_storage_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let storage = ArchiveStorage::open(dir.path().join("missing.tar"), None).unwrap();

    let err = storage.extract_all().await.unwrap_err();
    assert!(matches!(err, ArchiveError::Storage(e) if e.is_not_found()));
}

/// Stored zip holding `a.txt` = "hi" whose central directory claims, through
/// a zip64 extra field, an uncompressed size of `claimed` bytes
fn zip_with_claimed_size(claimed: u64) -> Bytes {
    let name = b"a.txt";
    let data = b"hi";
    let mut crc = flate2::Crc::new();
    crc.update(data);
    let crc = crc.sum();
    let dos_date: u16 = (40 << 9) | (1 << 5) | 1;

    let mut out = Vec::new();
    // local file header
    out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
    out.extend_from_slice(&20u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&dos_date.to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(name);
    out.extend_from_slice(data);

    // central directory
    let directory_offset = out.len() as u32;
    out.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
    out.extend_from_slice(&45u16.to_le_bytes());
    out.extend_from_slice(&45u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&dos_date.to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&u32::MAX.to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&12u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(name);
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&8u16.to_le_bytes());
    out.extend_from_slice(&claimed.to_le_bytes());
    let directory_size = out.len() as u32 - directory_offset;

    // end of central directory
    out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&directory_size.to_le_bytes());
    out.extend_from_slice(&directory_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());

    Bytes::from(out)
}

#[tokio::test]
async fn test_forged_entry_size_is_corrupt() {
    let bundle = zip_with_claimed_size(1 << 60);
    assert_eq!(bundle.len(), 122);

    let scratch = TempStorage::new().unwrap();
    let err = extract_all(bundle, ArchiveFormat::Zip, &scratch)
        .await
        .unwrap_err();

    assert!(matches!(err, ArchiveError::Corrupt(_)), "{err}");
    assert!(scratch.list_all("").await.unwrap().is_empty());
    scratch.close().await.unwrap();
}

#[tokio::test]
async fn test_entry_limit_applies_to_extraction() {
    let mut writer = ArchiveWriter::new(ArchiveFormat::TAR);
    writer.write_entry("tests/big.out", &[b'x'; 4096]).unwrap();
    let bundle = Bytes::from(writer.finish().unwrap());

    let scratch = TempStorage::new().unwrap();
    let err = extract_all_with_limit(bundle.clone(), ArchiveFormat::TAR, 1024, &scratch)
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::Corrupt(_)));

    let summary = extract_all_with_limit(bundle, ArchiveFormat::TAR, 4096, &scratch)
        .await
        .unwrap();
    assert_eq!(summary.bytes, 4096);
    scratch.close().await.unwrap();
}
