//! End-to-end pipeline tests over a full engine instance

use std::path::PathBuf;

use tempfile::TempDir;

use albums_core::LogLine;
use albums_sync_engine::{
    AlbumsEngine, BackupMetadata, BackupStatus, EngineConfig, NoopPhotoProvider, SyncMode,
};

fn line(ts: &str, message: &str) -> LogLine {
    LogLine::new(format!("{ts} Log        -  [Behaviour] {message}"))
}

fn march_session() -> Vec<LogLine> {
    vec![
        line(
            "2024.03.15 10:00:00",
            "Joining wrld_6caf5200-70e1-46c2-b043-e3c4abe69e40:12345",
        ),
        line("2024.03.15 10:00:01", "Joining or Creating Room: The Great Pug"),
        line("2024.03.15 10:01:00", "OnPlayerJoined Alice (usr_aaa)"),
        line("2024.03.15 10:05:00", "OnPlayerLeft Alice (usr_aaa)"),
        line("2024.03.15 10:06:00", "OnLeftRoom"),
    ]
}

async fn engine(dir: &TempDir) -> AlbumsEngine {
    AlbumsEngine::open(EngineConfig::under(dir.path()))
        .await
        .unwrap()
}

#[tokio::test]
async fn full_then_incremental_sync_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).await;
    engine.append_log_lines(&march_session()).await.unwrap();

    let first = engine
        .sync_logs(SyncMode::Full, &NoopPhotoProvider)
        .await
        .unwrap();
    // One world join, one player join, one player leave; the world
    // leave marker never lands in the database.
    assert_eq!(first.total_inserted(), 3);

    let second = engine
        .sync_logs(SyncMode::Incremental, &NoopPhotoProvider)
        .await
        .unwrap();
    assert_eq!(second.total_inserted(), 0);

    engine.close().await;
}

#[tokio::test]
async fn export_produces_reparseable_month_files() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).await;
    engine.append_log_lines(&march_session()).await.unwrap();
    engine
        .sync_logs(SyncMode::Full, &NoopPhotoProvider)
        .await
        .unwrap();

    let manifest = engine
        .export_log_store(None, None, engine.repository())
        .await
        .unwrap();
    assert_eq!(manifest.files.len(), 1);
    assert!(manifest.files[0].ends_with("2024-03/logStore-2024-03.txt"));

    let body = tokio::fs::read_to_string(&manifest.files[0]).await.unwrap();
    let lines: Vec<LogLine> = body.lines().map(LogLine::new).collect();
    let extraction = albums_core::parse_lines(&lines).unwrap();
    assert_eq!(extraction.events.len(), 3);
    assert_eq!(extraction.skipped_lines, 0);

    engine.close().await;
}

#[tokio::test]
async fn import_then_rollback_restores_prior_state() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).await;
    engine.append_log_lines(&march_session()).await.unwrap();
    engine
        .sync_logs(SyncMode::Full, &NoopPhotoProvider)
        .await
        .unwrap();
    let before = engine.repository().counts().await.unwrap();

    // Another installation's store: one April partition.
    let source = TempDir::new().unwrap();
    let partition = source.path().join("2024-04");
    std::fs::create_dir_all(&partition).unwrap();
    std::fs::write(
        partition.join("logStore-2024-04.txt"),
        "2024.04.01 09:00:00 Log        -  [Behaviour] OnPlayerJoined Dana (usr_ddd)\n",
    )
    .unwrap();

    let report = engine
        .import_log_store_files(
            &[source.path().to_path_buf()],
            engine.repository(),
            &NoopPhotoProvider,
        )
        .await
        .unwrap();
    assert_eq!(report.files_imported, 1);
    assert_eq!(report.invalid_lines, 0);
    assert_eq!(report.append.appended, 1);
    assert_eq!(report.sync.player_joins_inserted, 1);
    assert_eq!(report.backup.status, BackupStatus::Completed);
    assert!(report.backup.import_timestamp.is_some());

    let after_import = engine.repository().counts().await.unwrap();
    assert_eq!(after_import.player_joins, before.player_joins + 1);

    let rollback = engine
        .rollback_to_backup(&report.backup, &NoopPhotoProvider)
        .await
        .unwrap();
    assert_eq!(rollback.backup.status, BackupStatus::RolledBack);
    assert!(rollback.restored_partitions >= 1);
    assert_eq!(rollback.rebuilt.total(), before.total());

    let restored = engine.repository().counts().await.unwrap();
    assert_eq!(restored, before);

    // The sidecar on disk reflects the one-way flip too.
    let reloaded = engine
        .get_backup(&report.backup.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, BackupStatus::RolledBack);

    engine.close().await;
}

#[tokio::test]
async fn failed_rollback_leaves_derived_tables_untouched() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).await;
    engine.append_log_lines(&march_session()).await.unwrap();
    engine
        .sync_logs(SyncMode::Full, &NoopPhotoProvider)
        .await
        .unwrap();
    let before = engine.repository().counts().await.unwrap();
    assert!(before.total() > 0);

    // A structurally valid backup whose only partition cannot be
    // parsed: a world join with no room-name line.
    let backup_dir = TempDir::new().unwrap();
    std::fs::write(backup_dir.path().join("backup-metadata.json"), "{}").unwrap();
    let partition = backup_dir.path().join("2024-03");
    std::fs::create_dir_all(&partition).unwrap();
    std::fs::write(
        partition.join("logStore-2024-03.txt"),
        "2024.03.15 10:00:00 Log        -  [Behaviour] Joining wrld_abc:1\n",
    )
    .unwrap();

    let backup = BackupMetadata {
        id: "backup_broken".to_string(),
        backup_timestamp: chrono::Utc::now(),
        export_folder_path: backup_dir.path().to_path_buf(),
        source_files: Vec::new(),
        status: BackupStatus::Completed,
        import_timestamp: None,
        total_log_lines: 1,
        exported_files: Vec::new(),
    };

    let err = engine
        .rollback_to_backup(&backup, &NoopPhotoProvider)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        albums_sync_engine::EngineError::Parse(_)
    ));

    // The derived tables were never touched.
    let after = engine.repository().counts().await.unwrap();
    assert_eq!(after, before);

    engine.close().await;
}

#[tokio::test]
async fn import_with_no_store_files_fails_before_mutation() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir).await;

    let source = TempDir::new().unwrap();
    std::fs::write(source.path().join("notes.txt"), "nothing importable\n").unwrap();

    let err = engine
        .import_log_store_files(
            &[source.path().to_path_buf()],
            engine.repository(),
            &NoopPhotoProvider,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, albums_sync_engine::EngineError::Import(_)));

    // No backup was taken.
    assert!(engine.backup_history().await.unwrap().is_empty());
    let paths: Vec<PathBuf> = engine
        .store()
        .range_query(
            "2000-01-01T00:00:00".parse().unwrap(),
            chrono::Local::now().naive_local(),
            true,
        )
        .await
        .unwrap();
    assert!(paths.is_empty());

    engine.close().await;
}
