//! Tests for database initialization and schema versioning

use playroll_common::db::init::{init_database, init_memory_database};
use playroll_common::db::migrations::{get_schema_version, CURRENT_SCHEMA_VERSION};

#[tokio::test]
async fn test_creates_missing_file_and_parents() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("queue.db");

    let result = init_database(&db_path).await;
    assert!(result.is_ok(), "init_database failed: {:?}", result.err());

    // Parent directory and file are created on demand
    assert!(db_path.exists(), "queue.db missing after init");
}

#[tokio::test]
async fn test_reopen_keeps_rows() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("queue.db");

    let pool1 = init_database(&db_path).await.unwrap();
    sqlx::query("INSERT INTO queue_entries (queue_index, metadata) VALUES (0, '{}')")
        .execute(&pool1)
        .await
        .unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "reopen failed: {:?}", pool2.err());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_entries")
        .fetch_one(&pool2.unwrap())
        .await
        .unwrap();
    assert_eq!(count, 1, "Existing rows must survive reopen");
}

#[tokio::test]
async fn test_schema_version_recorded() {
    let pool = init_memory_database().await.unwrap();

    let version = get_schema_version(&pool).await.unwrap();
    assert_eq!(version, CURRENT_SCHEMA_VERSION);

    // Running migrations again is a no-op
    playroll_common::db::migrations::run_migrations(&pool).await.unwrap();
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, CURRENT_SCHEMA_VERSION as i64);
}

#[tokio::test]
async fn test_queue_index_is_not_unique() {
    let pool = init_memory_database().await.unwrap();

    let unique: i64 = sqlx::query_scalar(
        r#"
        SELECT "unique" FROM pragma_index_list('queue_entries')
        WHERE name = 'idx_queue_entries_index'
        "#,
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(unique, 0);
}

#[tokio::test]
async fn test_first_version_creates_full_table() {
    let pool = init_memory_database().await.unwrap();
    assert_eq!(get_schema_version(&pool).await.unwrap(), 1);

    let has_column: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('queue_entries') WHERE name = 'updated_at'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(has_column, 1);
}

#[tokio::test]
async fn test_newer_schema_left_untouched() {
    let pool = init_memory_database().await.unwrap();
    sqlx::query("INSERT INTO schema_version (version) VALUES (99)")
        .execute(&pool)
        .await
        .unwrap();

    playroll_common::db::migrations::run_migrations(&pool).await.unwrap();
    assert_eq!(get_schema_version(&pool).await.unwrap(), 99);
}
