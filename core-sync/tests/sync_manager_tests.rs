//! End-to-end validation and mirror runs over real directory trees

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bridge_desktop::TempStorage;
use bridge_traits::{MemoryLogger, StorageBackend, StorageError};
use bytes::Bytes;
use core_archive::{ArchiveFormat, ArchiveWriter};
use core_sync::{
    ConfigError, FileType, StorageEndpoint, SyncConfig, SyncError, SyncManager, SyncState,
};

const DESCRIPTOR: &str = r#"{"name": "a-plus-b", "files": {"sol.cpp": "compile", "tests/01.in": "testcase", "gone.txt": "judge"}}"#;

async fn write(root: &Path, path: &str, data: &str) {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
        tokio::fs::create_dir_all(parent).await.unwrap();
    }
    tokio::fs::write(full, data).await.unwrap();
}

/// Every file under `root` with its contents, keyed by relative path
fn tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let relative = path
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/");
                out.insert(relative, std::fs::read(&path).unwrap());
            }
        }
    }

    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

async fn problem_tree(root: &Path) {
    write(root, "config.json", DESCRIPTOR).await;
    write(root, "sol.cpp", "int main() {}\n").await;
    write(root, "tests/01.in", "1 2\n").await;
    write(root, "tests/01.out", "3\n").await;
}

async fn manager(
    source: &Path,
    destination: Option<&Path>,
    config: SyncConfig,
) -> (SyncManager, Arc<MemoryLogger>) {
    let logger = Arc::new(MemoryLogger::new());
    let source = StorageEndpoint::local(source, false).await.unwrap();
    let destination = match destination {
        Some(path) => Some(StorageEndpoint::local(path, true).await.unwrap()),
        None => None,
    };
    let manager = SyncManager::new(source, destination, logger.clone(), config);
    (manager, logger)
}

#[tokio::test]
async fn test_validate_reconciles_descriptor() {
    let source = tempfile::tempdir().unwrap();
    problem_tree(source.path()).await;

    let (mut manager, logger) = manager(source.path(), None, SyncConfig::default()).await;
    let classification = manager.validate_source().await.unwrap();

    assert_eq!(classification["sol.cpp"], FileType::Compile);
    assert_eq!(classification["tests/01.in"], FileType::Testcase);
    assert_eq!(classification["tests/01.out"], FileType::Default);
    assert_eq!(classification["config.json"], FileType::Default);
    assert!(!classification.contains_key("gone.txt"));
    assert!(!classification.contains_key("tests"));

    assert_eq!(manager.session().state, SyncState::Validated);
    assert!(logger
        .messages()
        .contains(&"Declared file does not exist".to_string()));
}

#[tokio::test]
async fn test_mirror_keeps_destination_only_files() {
    let source = tempfile::tempdir().unwrap();
    let destination = tempfile::tempdir().unwrap();
    write(source.path(), "config.json", r#"{"files": {}}"#).await;
    write(source.path(), "d/x.txt", "x").await;
    write(destination.path(), "y.txt", "y").await;

    let (mut manager, _) =
        manager(source.path(), Some(destination.path()), SyncConfig::default()).await;
    let report = manager.sync_with_validation().await.unwrap();

    let result = tree(destination.path());
    assert_eq!(result["d/x.txt"], b"x");
    assert_eq!(result["y.txt"], b"y");
    assert_eq!(report.files_copied, 2);
    assert!(report.directories_created >= 1);
    assert!(!report.used_bulk_transport);
    assert_eq!(manager.session().state, SyncState::Done);
}

#[tokio::test]
async fn test_missing_descriptor_leaves_destination_untouched() {
    let source = tempfile::tempdir().unwrap();
    let destination = tempfile::tempdir().unwrap();
    write(source.path(), "sol.cpp", "int main() {}\n").await;
    write(destination.path(), "y.txt", "y").await;
    let before = tree(destination.path());

    let (mut manager, logger) =
        manager(source.path(), Some(destination.path()), SyncConfig::default()).await;
    let err = manager.sync_with_validation().await.unwrap_err();

    assert!(matches!(err, SyncError::Config(ConfigError::NotFound)));
    assert_eq!(err.to_string(), "config file not found!");
    assert_eq!(tree(destination.path()), before);

    let session = manager.session();
    assert_eq!(session.state, SyncState::Failed);
    assert_eq!(session.error_message.as_deref(), Some("config file not found!"));
    assert!(logger.messages().contains(&"Sync session failed".to_string()));
}

#[tokio::test]
async fn test_malformed_descriptor_is_fatal() {
    let source = tempfile::tempdir().unwrap();
    write(source.path(), "config.json", r#"{"files": "everything"}"#).await;

    let (mut manager, _) = manager(source.path(), None, SyncConfig::default()).await;
    let err = manager.validate_source().await.unwrap_err();

    assert!(matches!(err, SyncError::Config(ConfigError::Malformed(_))));
    assert_eq!(manager.session().state, SyncState::Failed);

    // terminal sessions refuse further work
    assert!(matches!(
        manager.validate_source().await,
        Err(SyncError::InvalidStateTransition { .. })
    ));
}

#[tokio::test]
async fn test_worker_count_does_not_change_result() {
    let source = tempfile::tempdir().unwrap();
    write(source.path(), "config.json", r#"{"files": {}}"#).await;
    for i in 0..40 {
        let body = format!("case {i}\n").repeat(i + 1);
        write(source.path(), &format!("tests/group{}/{i:02}.in", i % 5), &body).await;
    }

    let serial = tempfile::tempdir().unwrap();
    let parallel = tempfile::tempdir().unwrap();

    let (mut one, _) = manager(source.path(), Some(serial.path()), SyncConfig::default()).await;
    let report_one = one.sync_without_validation(1).await.unwrap();

    let (mut eight, _) = manager(source.path(), Some(parallel.path()), SyncConfig::default()).await;
    let report_eight = eight.sync_without_validation(8).await.unwrap();

    assert_eq!(tree(serial.path()), tree(parallel.path()));
    assert_eq!(tree(serial.path()), tree(source.path()));
    assert_eq!(report_one.files_copied, 41);
    assert_eq!(report_one, report_eight);
}

#[tokio::test]
async fn test_missing_destination() {
    let source = tempfile::tempdir().unwrap();
    problem_tree(source.path()).await;

    let (mut manager, _) = manager(source.path(), None, SyncConfig::default()).await;

    let err = manager.sync_with_validation().await.unwrap_err();
    assert!(matches!(err, SyncError::DestinationUndefined));
    assert_eq!(err.to_string(), "sync failed, destination not defined!");

    let err = manager.sync_without_validation(4).await.unwrap_err();
    assert!(matches!(err, SyncError::DestinationUndefined));

    // nothing was started
    assert_eq!(manager.session().state, SyncState::Idle);
}

#[tokio::test]
async fn test_archive_source_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let source = StorageEndpoint::archive(dir.path().join("bundle.zip"), None).unwrap();

    let mut manager = SyncManager::new(
        source,
        None,
        Arc::new(MemoryLogger::new()),
        SyncConfig::default(),
    );
    let err = manager.validate_source().await.unwrap_err();

    assert!(matches!(err, SyncError::FileSystem(StorageError::Unsupported(_))));
    assert_eq!(manager.session().state, SyncState::Failed);
}

#[tokio::test]
async fn test_ignore_rules_filter_mirror() {
    let source = tempfile::tempdir().unwrap();
    let destination = tempfile::tempdir().unwrap();
    problem_tree(source.path()).await;
    write(source.path(), ".gitignore", "*.log\n!keep.log\nbuild/\nconfig.json\n").await;
    write(source.path(), "app.log", "noise").await;
    write(source.path(), "keep.log", "signal").await;
    write(source.path(), "build/sol", "\x7fELF").await;

    let (mut manager, _) =
        manager(source.path(), Some(destination.path()), SyncConfig::default()).await;
    let report = manager.sync_with_validation().await.unwrap();

    let result = tree(destination.path());
    assert!(result.contains_key(".gitignore"));
    assert!(result.contains_key("config.json"), "descriptor is never ignored");
    assert!(result.contains_key("keep.log"));
    assert!(!result.contains_key("app.log"));
    assert!(!result.contains_key("build/sol"));
    assert!(!destination.path().join("build").exists());
    assert_eq!(report.files_ignored, 3);
}

#[tokio::test]
async fn test_snapshot_written_and_mirrored() {
    let source = tempfile::tempdir().unwrap();
    let destination = tempfile::tempdir().unwrap();
    problem_tree(source.path()).await;

    let config = SyncConfig {
        write_snapshot: true,
        ..SyncConfig::default()
    };
    let (mut manager, _) = manager(source.path(), Some(destination.path()), config).await;
    manager.sync_with_validation().await.unwrap();

    let snapshot: serde_json::Value =
        serde_json::from_slice(&tree(source.path())["config.generated.json"]).unwrap();
    assert_eq!(snapshot["name"], "a-plus-b");
    assert_eq!(snapshot["files"]["sol.cpp"], "compile");
    assert_eq!(snapshot["files"]["tests/01.out"], "default");
    assert!(snapshot["files"].get("gone.txt").is_none());

    assert!(tree(destination.path()).contains_key("config.generated.json"));

    // a later validation does not classify the snapshot itself
    let (mut again, _) = manager_for(source.path()).await;
    let classification = again.validate_source().await.unwrap();
    assert!(!classification.contains_key("config.generated.json"));
}

async fn manager_for(source: &Path) -> (SyncManager, Arc<MemoryLogger>) {
    manager(source, None, SyncConfig::default()).await
}

#[tokio::test]
async fn test_skip_unchanged_second_run() {
    let source = tempfile::tempdir().unwrap();
    let destination = tempfile::tempdir().unwrap();
    problem_tree(source.path()).await;

    let config = SyncConfig {
        skip_unchanged: true,
        ..SyncConfig::default()
    };

    let (mut first, _) = manager(source.path(), Some(destination.path()), config.clone()).await;
    let report = first.sync_with_validation().await.unwrap();
    assert_eq!(report.files_copied, 4);
    assert_eq!(report.files_skipped, 0);

    let (mut second, _) = manager(source.path(), Some(destination.path()), config).await;
    let report = second.sync_with_validation().await.unwrap();
    assert_eq!(report.files_copied, 0);
    assert_eq!(report.files_skipped, 4);
}

#[tokio::test]
async fn test_skip_unchanged_overwrites_newer_edited_destination() {
    let source = tempfile::tempdir().unwrap();
    let destination = tempfile::tempdir().unwrap();
    write(source.path(), "config.json", r#"{"files": {}}"#).await;
    write(source.path(), "a.txt", "aaaa").await;

    // same length, different bytes, edited after the source
    write(destination.path(), "a.txt", "bbbb").await;
    std::fs::File::options()
        .write(true)
        .open(destination.path().join("a.txt"))
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(60))
        .unwrap();

    let config = SyncConfig {
        skip_unchanged: true,
        ..SyncConfig::default()
    };
    let (mut manager, _) = manager(source.path(), Some(destination.path()), config).await;
    let report = manager.sync_with_validation().await.unwrap();

    assert_eq!(report.files_skipped, 0);
    assert_eq!(tree(destination.path())["a.txt"], b"aaaa".to_vec());
}

#[tokio::test]
async fn test_endpoints_released_on_success_and_failure() {
    let is_closed = |endpoint: &StorageEndpoint| match endpoint {
        StorageEndpoint::Temporary(storage) => storage.is_closed(),
        _ => false,
    };

    // success
    let source = TempStorage::new().unwrap();
    source
        .write_all("config.json", Bytes::from(r#"{"files": {}}"#))
        .await
        .unwrap();
    let mut manager = SyncManager::new(
        StorageEndpoint::Temporary(source),
        Some(StorageEndpoint::temporary().unwrap()),
        Arc::new(MemoryLogger::new()),
        SyncConfig::default(),
    );
    assert!(!is_closed(manager.source()));
    manager.sync_with_validation().await.unwrap();
    assert!(is_closed(manager.source()));
    assert!(is_closed(manager.destination().unwrap()));

    // failure
    let mut manager = SyncManager::new(
        StorageEndpoint::temporary().unwrap(),
        Some(StorageEndpoint::temporary().unwrap()),
        Arc::new(MemoryLogger::new()),
        SyncConfig::default(),
    );
    assert!(manager.sync_with_validation().await.is_err());
    assert!(is_closed(manager.source()));
    assert!(is_closed(manager.destination().unwrap()));
}

#[tokio::test]
async fn test_submitted_bundle_syncs_to_local() {
    let mut writer = ArchiveWriter::new(ArchiveFormat::TAR_GZ);
    writer
        .write_entry("config.json", br#"{"files": {"sol.py": "compile"}}"#)
        .unwrap();
    writer.write_entry("sol.py", b"print(3)\n").unwrap();
    writer.write_directory("tests").unwrap();
    writer.write_entry("tests/01.in", b"1 2\n").unwrap();
    let bundle = Bytes::from(writer.finish().unwrap());

    let source = StorageEndpoint::ingest_archive(bundle, Some("upload.tgz"), None)
        .await
        .unwrap();
    let destination = tempfile::tempdir().unwrap();

    let mut manager = SyncManager::new(
        source,
        Some(StorageEndpoint::local(destination.path(), false).await.unwrap()),
        Arc::new(MemoryLogger::new()),
        SyncConfig::default(),
    );
    let report = manager.sync_with_validation().await.unwrap();

    assert_eq!(report.files_copied, 3);
    assert_eq!(tree(destination.path())["sol.py"], b"print(3)\n");
    assert_eq!(
        manager.session().classification.as_ref().unwrap()["sol.py"],
        FileType::Compile
    );
}

#[tokio::test]
async fn test_revalidation_and_clone_after_validation() {
    let source = tempfile::tempdir().unwrap();
    let destination = tempfile::tempdir().unwrap();
    problem_tree(source.path()).await;

    let (mut manager, _) =
        manager(source.path(), Some(destination.path()), SyncConfig::default()).await;
    manager.validate_source().await.unwrap();
    write(source.path(), "tests/02.in", "5 6\n").await;
    let classification = manager.validate_source().await.unwrap();
    assert!(classification.contains_key("tests/02.in"));

    let report = manager.sync_without_validation(2).await.unwrap();
    assert_eq!(report.files_copied, 5);
    assert!(manager
        .destination()
        .unwrap()
        .backend()
        .exists("tests/02.in")
        .await
        .unwrap());
}
