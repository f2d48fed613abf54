//! Atomic multi-table renames against a live MySQL server.
//!
//! Skipped unless `HADRON_TEST_DATABASE_URL` is set.

mod common;

use hadron::migrate::{MigrationError, rename_tables};

use common::*;

#[tokio::test]
async fn test_rename_multiple_tables() {
    let Some(pool) = pool().await else { return };
    sql(&pool, "DROP TABLE IF EXISTS `rn_renameme_new`").await;
    recreate(&pool, "rn_renameme", &["`text` varchar(255) DEFAULT NULL"]).await;
    recreate(&pool, "rn_renamemetoo", &["`number` int(11) DEFAULT NULL"]).await;

    let session = session(&pool).await;
    rename_tables(
        &session,
        &[("rn_renameme", "rn_renameme_new"), ("rn_renamemetoo", "rn_renameme")],
    )
    .await
    .unwrap();

    assert_column(&pool, "rn_renameme", "number", "int").await;
    assert_column(&pool, "rn_renameme_new", "text", "varchar").await;
    assert!(!exists(&pool, "rn_renamemetoo").await);
}

#[tokio::test]
async fn test_swap_two_tables() {
    let Some(pool) = pool().await else { return };
    sql(&pool, "DROP TABLE IF EXISTS `rn_left_hadron_swap`").await;
    recreate(&pool, "rn_left", &["`left_col` int(11) DEFAULT NULL"]).await;
    recreate(&pool, "rn_right", &["`right_col` int(11) DEFAULT NULL"]).await;

    let session = session(&pool).await;
    rename_tables(&session, &[("rn_left", "rn_right"), ("rn_right", "rn_left")])
        .await
        .unwrap();

    assert_column(&pool, "rn_left", "right_col", "int").await;
    assert_column(&pool, "rn_right", "left_col", "int").await;
    assert!(!exists(&pool, "rn_left_hadron_swap").await);
}

#[tokio::test]
async fn test_failed_rename_changes_nothing() {
    let Some(pool) = pool().await else { return };
    sql(&pool, "DROP TABLE IF EXISTS `rn_missing`").await;
    sql(&pool, "DROP TABLE IF EXISTS `rn_kept_new`").await;
    recreate(&pool, "rn_kept", &["`text` varchar(255) DEFAULT NULL"]).await;

    let session = session(&pool).await;
    let result = rename_tables(
        &session,
        &[("rn_kept", "rn_kept_new"), ("rn_missing", "rn_kept")],
    )
    .await;

    assert!(matches!(result, Err(MigrationError::Swap(_))));
    assert!(exists(&pool, "rn_kept").await);
    assert!(!exists(&pool, "rn_kept_new").await);
}
