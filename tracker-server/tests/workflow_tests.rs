//! Source Mutation Workflow and Upload Staging Area against a real database

mod helpers;

use helpers::*;
use tracker_common::db::UploadKind;
use tracker_server::bundles::{build_bundles, BundleOrder, DisplayType};
use tracker_server::db::{file_versions, sources, temp_uploads};
use tracker_server::error::ApiError;
use tracker_server::staging::StagingArea;
use tracker_server::storage::BlobStorage;

fn expect_validation(err: ApiError) -> Box<tracker_server::error::ValidationFailure> {
    match err {
        ApiError::Validation(failure) => failure,
        other => panic!("expected validation failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_create_bundle_with_extra_links() {
    let env = TestEnv::new().await;

    let mut sub = submission(form("Report", "Q1 review", "https://example.com/r.pdf"));
    sub.extra_links = vec!["mailto:a@b.com".to_string(), "https://example.com/x".to_string(), "  ".to_string()];

    let outcome = env.workflow().create(env.event_id, sub, env.admin.id).await.unwrap();
    assert_eq!(outcome.created_ids.len(), 2);
    assert_eq!(
        outcome.message,
        "Source created: main link added, 2 additional link(s) added."
    );

    let rows = sources::list_for_event(&env.db, env.event_id, false).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.bundle_id == outcome.bundle_id));

    let bundles = build_bundles(rows, BundleOrder::NameAsc);
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].display_type, DisplayType::Link);
    assert_eq!(bundles[0].leader.id, outcome.leader_id);
    assert_eq!(bundles[0].link_count, 3);
}

#[tokio::test]
async fn test_duplicate_summary_rejected_without_writes() {
    let env = TestEnv::new().await;
    env.workflow()
        .create(env.event_id, submission(form("Report", "Q1 review", "https://example.com/r.pdf")), env.admin.id)
        .await
        .unwrap();
    let before = count_sources(&env.db, env.event_id).await;

    let mut sub = submission(form("Other report", "  q1 REVIEW ", "https://example.com/other"));
    sub.extra_links = vec!["https://example.com/y".to_string()];
    let failure = expect_validation(env.workflow().create(env.event_id, sub, env.admin.id).await.unwrap_err());

    assert_eq!(
        failure.errors.fields["summary"],
        vec!["Summary must be different from existing ones for this event.".to_string()]
    );
    assert_eq!(count_sources(&env.db, env.event_id).await, before);
}

#[tokio::test]
async fn test_staged_file_survives_validation_failure() {
    let env = TestEnv::new().await;

    let mut sub = submission(form("Report", "Q1 review", ""));
    let batch = sub.batch;
    sub.main_file = Some(pdf("report.pdf"));
    sub.extra_links = vec!["ftp://example.com/file".to_string()];

    let failure = expect_validation(env.workflow().create(env.event_id, sub, env.admin.id).await.unwrap_err());
    assert!(failure.errors.has_field("extra_links"));
    assert!(failure.errors.fields["extra_links"][0].starts_with("Link #1:"));
    assert_eq!(failure.state["staged_main"]["original_name"], "report.pdf");
    assert_eq!(failure.state["extra_links"][0], "ftp://example.com/file");
    assert_eq!(count_staged(&env.db, &batch).await, 1);
    assert_eq!(count_sources(&env.db, env.event_id).await, 0);

    // Resubmit without re-uploading; the staged main file is used
    let mut retry = submission(form("Report", "Q1 review", ""));
    retry.batch = batch;
    retry.extra_links = vec!["https://example.com/file".to_string()];
    let outcome = env.workflow().create(env.event_id, retry, env.admin.id).await.unwrap();

    assert_eq!(count_staged(&env.db, &batch).await, 0);
    let leader = sources::get(&env.db, outcome.leader_id).await.unwrap().unwrap();
    let key = leader.file_upload.expect("leader carries the staged file");
    assert!(key.starts_with("sources/"));
    assert!(key.ends_with("/report.pdf"));
    assert!(env.storage.exists(&key).await.unwrap());
    assert_eq!(count_files(&env.media_root().join("tmp")), 0);
    assert!(outcome.message.starts_with("Source created: main file attached"));
}

#[tokio::test]
async fn test_second_main_file_replaces_first() {
    let env = TestEnv::new().await;
    let staging = StagingArea::new(&env.db, env.storage.as_ref(), &env.policy);
    let batch = tracker_common::tokens::BatchId::generate();

    staging.stage(&batch, Some(env.admin.id), Some(pdf("first.pdf")), Vec::new()).await.unwrap();
    let first = staging.get_staged(&batch).await.unwrap().main.unwrap();
    staging.stage(&batch, Some(env.admin.id), Some(pdf("second.pdf")), Vec::new()).await.unwrap();

    let staged = staging.get_staged(&batch).await.unwrap();
    assert_eq!(staged.main.as_ref().unwrap().original_name, "second.pdf");
    assert!(staged.extras.is_empty());
    assert_eq!(count_staged(&env.db, &batch).await, 1);
    assert!(!env.storage.exists(&first.file).await.unwrap());
}

#[tokio::test]
async fn test_clear_staged_subset() {
    let env = TestEnv::new().await;
    let staging = StagingArea::new(&env.db, env.storage.as_ref(), &env.policy);
    let batch = tracker_common::tokens::BatchId::generate();

    let report = staging
        .stage(&batch, None, None, vec![pdf("a.pdf"), pdf("b.pdf"), pdf("c.pdf")])
        .await
        .unwrap();
    assert_eq!(report.extra_ids.len(), 3);

    let removed = staging.clear_staged(&batch, Some(&report.extra_ids[..1])).await.unwrap();
    assert_eq!(removed, 1);
    let names: Vec<String> = staging
        .get_staged(&batch)
        .await
        .unwrap()
        .extras
        .into_iter()
        .map(|t| t.original_name)
        .collect();
    assert_eq!(names, vec!["b.pdf".to_string(), "c.pdf".to_string()]);

    // Ids from another batch are never touched
    let other = tracker_common::tokens::BatchId::generate();
    assert_eq!(staging.clear_staged(&other, Some(&report.extra_ids)).await.unwrap(), 0);
    assert_eq!(staging.clear_staged(&batch, None).await.unwrap(), 2);
    assert_eq!(count_staged(&env.db, &batch).await, 0);
}

#[tokio::test]
async fn test_abandoned_batches_are_purged() {
    let env = TestEnv::new().await;
    let staging = StagingArea::new(&env.db, env.storage.as_ref(), &env.policy);
    let abandoned = tracker_common::tokens::BatchId::generate();
    let fresh = tracker_common::tokens::BatchId::generate();

    staging.stage(&abandoned, None, Some(pdf("old.pdf")), vec![pdf("old-annex.pdf")]).await.unwrap();
    staging.stage(&fresh, None, Some(pdf("new.pdf")), Vec::new()).await.unwrap();
    sqlx::query("UPDATE temp_uploads SET created_at = '2020-01-01T00:00:00.000000Z' WHERE batch_id = ?")
        .bind(abandoned.to_string())
        .execute(&env.db)
        .await
        .unwrap();
    assert_eq!(count_files(&env.media_root().join("tmp")), 3);

    let purged = staging.purge_abandoned(chrono::Duration::hours(24)).await.unwrap();
    assert_eq!(purged, 2);
    assert_eq!(count_staged(&env.db, &abandoned).await, 0);
    assert_eq!(count_staged(&env.db, &fresh).await, 1);
    assert_eq!(count_files(&env.media_root().join("tmp")), 1);

    assert_eq!(staging.purge_abandoned(chrono::Duration::hours(24)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_disallowed_extension_is_skipped_with_warning() {
    let env = TestEnv::new().await;

    let mut sub = submission(form("Report", "Q1 review", "https://example.com/r"));
    let batch = sub.batch;
    sub.main_file = Some(pdf("payload.exe"));
    sub.extra_files = vec![pdf("notes.txt"), pdf("memo.docx")];

    let outcome = env.workflow().create(env.event_id, sub, env.admin.id).await.unwrap();
    assert_eq!(outcome.warnings.len(), 3);
    assert!(outcome.warnings[2].starts_with("2 file(s) were skipped"));
    assert_eq!(outcome.created_ids.len(), 1);

    let leader = sources::get(&env.db, outcome.leader_id).await.unwrap().unwrap();
    assert!(leader.file_upload.is_none());
    let sibling = sources::get(&env.db, outcome.created_ids[0]).await.unwrap().unwrap();
    assert!(sibling.file_upload.unwrap().ends_with("memo.docx"));
    assert_eq!(count_staged(&env.db, &batch).await, 0);
}

#[tokio::test]
async fn test_only_rejected_files_means_nothing_attached() {
    let env = TestEnv::new().await;

    let mut sub = submission(form("Report", "Q1 review", ""));
    sub.main_file = Some(pdf("payload.exe"));

    let failure = expect_validation(env.workflow().create(env.event_id, sub, env.admin.id).await.unwrap_err());
    assert_eq!(
        failure.errors.non_field_errors,
        vec!["Please add at least one link or file before saving.".to_string()]
    );
    assert!(!failure.warnings.is_empty());
    assert!(failure.state["staged_main"].is_null());
}

#[tokio::test]
async fn test_failed_sibling_insert_rolls_back_everything() {
    let env = TestEnv::new().await;
    sqlx::query(
        r#"
        CREATE TRIGGER fail_on_boom BEFORE INSERT ON sources
        WHEN NEW.link_or_file = 'https://example.com/boom'
        BEGIN SELECT RAISE(ABORT, 'injected failure'); END
        "#,
    )
    .execute(&env.db)
    .await
    .unwrap();

    let mut sub = submission(form("Report", "Q1 review", "https://example.com/r"));
    let batch = sub.batch;
    sub.main_file = Some(pdf("report.pdf"));
    sub.extra_links = vec![
        "https://example.com/a".to_string(),
        "https://example.com/boom".to_string(),
        "https://example.com/c".to_string(),
    ];

    let err = env.workflow().create(env.event_id, sub, env.admin.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Common(_) | ApiError::Database(_)));

    assert_eq!(count_sources(&env.db, env.event_id).await, 0);
    // Staged upload kept for a retry, promoted copy removed
    assert_eq!(count_staged(&env.db, &batch).await, 1);
    assert_eq!(count_files(&env.media_root().join("sources")), 0);
}

#[tokio::test]
async fn test_replacing_main_file_snapshots_old_file() {
    let env = TestEnv::new().await;

    let mut sub = submission(form("Report", "Q1 review", ""));
    sub.main_file = Some(pdf("v1.pdf"));
    let created = env.workflow().create(env.event_id, sub, env.admin.id).await.unwrap();
    let before = sources::get(&env.db, created.leader_id).await.unwrap().unwrap();
    let old_key = before.file_upload.clone().unwrap();

    let mut update = submission(form("Report", "Q1 review", ""));
    update.main_file = Some(pdf("v2.pdf"));
    let outcome = env.workflow().update(created.leader_id, update, env.admin.id).await.unwrap();
    assert!(outcome.version_id.is_some());
    assert_eq!(outcome.message, "Source updated: main file updated.");

    let after = sources::get(&env.db, created.leader_id).await.unwrap().unwrap();
    assert_eq!(after.download_token, before.download_token);
    assert!(after.file_upload.as_deref().unwrap().ends_with("/v2.pdf"));

    let versions = file_versions::list_for_source(&env.db, created.leader_id).await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].file, old_key);
    assert_eq!(versions[0].original_name, "v1.pdf");
    assert_ne!(versions[0].download_token, before.download_token);
    // History keeps the old bytes
    assert!(env.storage.exists(&old_key).await.unwrap());
}

#[tokio::test]
async fn test_tokens_stable_across_updates() {
    let env = TestEnv::new().await;

    let mut sub = submission(form("Report", "Q1 review", "https://example.com/r"));
    sub.extra_links = vec!["https://example.com/a".to_string()];
    let created = env.workflow().create(env.event_id, sub, env.admin.id).await.unwrap();
    let tokens_before: Vec<_> = sources::list_bundle(&env.db, &created.bundle_id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| (s.id, s.download_token))
        .collect();

    let mut update = submission(form("Report (revised)", "Q1 review", "https://example.com/r2"));
    update.extra_links = vec!["https://example.com/b".to_string()];
    env.workflow().update(created.leader_id, update, env.admin.id).await.unwrap();

    let members = sources::list_bundle(&env.db, &created.bundle_id).await.unwrap();
    assert_eq!(members.len(), 3);
    for (id, token) in tokens_before {
        let member = members.iter().find(|m| m.id == id).unwrap();
        assert_eq!(member.download_token, token);
    }
    // Descriptive fields follow the leader so the bundle stays whole
    assert!(members.iter().all(|m| m.name == "Report (revised)"));
    let bundles = build_bundles(members, BundleOrder::NameAsc);
    assert_eq!(bundles.len(), 1);
}

#[tokio::test]
async fn test_archive_is_scoped_to_own_bundle() {
    let env = TestEnv::new().await;

    let mut a = submission(form("A", "first", "https://example.com/a"));
    a.extra_links = vec!["https://example.com/a2".to_string()];
    let bundle_a = env.workflow().create(env.event_id, a, env.admin.id).await.unwrap();
    let bundle_b = env
        .workflow()
        .create(env.event_id, submission(form("B", "second", "https://example.com/b")), env.admin.id)
        .await
        .unwrap();

    let mut cross = submission(form("A", "first", "https://example.com/a"));
    cross.remove_item_ids = vec![bundle_b.leader_id];
    let failure = expect_validation(env.workflow().update(bundle_a.leader_id, cross, env.admin.id).await.unwrap_err());
    assert!(failure.errors.has_field("remove_item_ids"));

    let mut own = submission(form("A", "first", "https://example.com/a"));
    own.remove_item_ids = vec![bundle_a.created_ids[0]];
    let outcome = env.workflow().update(bundle_a.leader_id, own, env.admin.id).await.unwrap();
    assert_eq!(outcome.archived_ids, bundle_a.created_ids);
    assert_eq!(outcome.message, "Source updated: 1 item(s) archived.");

    let sibling = sources::get(&env.db, bundle_a.created_ids[0]).await.unwrap().unwrap();
    assert!(!sibling.is_active);
    let other = sources::get(&env.db, bundle_b.leader_id).await.unwrap().unwrap();
    assert!(other.is_active);
}

#[tokio::test]
async fn test_update_cannot_empty_bundle() {
    let env = TestEnv::new().await;

    let mut sub = submission(form("Report", "Q1 review", "https://example.com/r"));
    sub.extra_files = vec![pdf("annex.pdf")];
    let created = env.workflow().create(env.event_id, sub, env.admin.id).await.unwrap();

    let mut update = submission(form("Report", "Q1 review", ""));
    update.remove_item_ids = created.created_ids.clone();
    let failure = expect_validation(env.workflow().update(created.leader_id, update, env.admin.id).await.unwrap_err());
    assert_eq!(
        failure.errors.non_field_errors,
        vec!["The bundle must keep at least one link or file.".to_string()]
    );

    let leader = sources::get(&env.db, created.leader_id).await.unwrap().unwrap();
    assert_eq!(leader.link_or_file, "https://example.com/r");
    let sibling = sources::get(&env.db, created.created_ids[0]).await.unwrap().unwrap();
    assert!(sibling.is_active);
}

#[tokio::test]
async fn test_update_keeps_own_summary() {
    let env = TestEnv::new().await;
    let created = env
        .workflow()
        .create(env.event_id, submission(form("Report", "Q1 review", "https://example.com/r")), env.admin.id)
        .await
        .unwrap();

    let outcome = env
        .workflow()
        .update(created.leader_id, submission(form("Report", "Q1 Review", "https://example.com/r")), env.admin.id)
        .await
        .unwrap();
    assert_eq!(outcome.message, "Source updated: details updated.");

    let unchanged = env
        .workflow()
        .update(created.leader_id, submission(form("Report", "Q1 Review", "https://example.com/r")), env.admin.id)
        .await
        .unwrap();
    assert_eq!(unchanged.message, "Source updated. No changes detected.");
}

#[tokio::test]
async fn test_dropped_staged_item_is_not_attached() {
    let env = TestEnv::new().await;

    let mut first = submission(form("Report", "", "https://example.com/r"));
    let batch = first.batch;
    first.extra_files = vec![pdf("keep.pdf"), pdf("drop.pdf")];
    expect_validation(env.workflow().create(env.event_id, first, env.admin.id).await.unwrap_err());

    let staged = temp_uploads::list_batch(&env.db, &batch.to_string()).await.unwrap();
    assert_eq!(staged.len(), 2);
    assert!(staged.iter().all(|t| t.kind == UploadKind::Extra));
    let drop_id = staged.iter().find(|t| t.original_name == "drop.pdf").unwrap().id;

    let mut retry = submission(form("Report", "Q1 review", "https://example.com/r"));
    retry.batch = batch;
    retry.drop_temp_ids = vec![drop_id];
    let outcome = env.workflow().create(env.event_id, retry, env.admin.id).await.unwrap();

    assert_eq!(outcome.created_ids.len(), 1);
    let sibling = sources::get(&env.db, outcome.created_ids[0]).await.unwrap().unwrap();
    assert!(sibling.file_upload.unwrap().ends_with("/keep.pdf"));
    assert_eq!(count_staged(&env.db, &batch).await, 0);
}

#[tokio::test]
async fn test_unknown_event_or_source_is_not_found() {
    let env = TestEnv::new().await;
    let err = env
        .workflow()
        .create(9999, submission(form("R", "S", "https://example.com")), env.admin.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));

    let err = env
        .workflow()
        .update(9999, submission(form("R", "S", "https://example.com")), env.admin.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

/// Inserts a row of bundle `twin` with `summary` whenever another bundle
/// writes to `sources`, as a concurrent writer committing first would
async fn add_twin_writer(env: &TestEnv, event: &str, summary: &str) {
    sqlx::query(&format!(
        r#"
        CREATE TRIGGER twin_writer AFTER {event} ON sources
        WHEN NEW.bundle_id <> 'twin' AND NOT EXISTS (SELECT 1 FROM sources WHERE bundle_id = 'twin')
        BEGIN
            INSERT INTO sources (
                event_id, bundle_id, name, source_date, summary, link_or_file,
                source_type, download_token, created_at
            ) VALUES (
                NEW.event_id, 'twin', 'Twin', NEW.source_date, '{summary}', 'https://example.com/twin',
                'LINK', lower(hex(randomblob(16))), NEW.created_at
            );
        END
        "#
    ))
    .execute(&env.db)
    .await
    .unwrap();
}

#[tokio::test]
async fn test_create_rechecks_summary_inside_transaction() {
    let env = TestEnv::new().await;
    add_twin_writer(&env, "INSERT", "Q1 review").await;

    let mut sub = submission(form("Report", "Q1 review", "https://example.com/r"));
    let batch = sub.batch;
    sub.main_file = Some(pdf("report.pdf"));
    let failure = expect_validation(env.workflow().create(env.event_id, sub, env.admin.id).await.unwrap_err());

    assert_eq!(
        failure.errors.fields["summary"],
        vec!["Summary must be different from existing ones for this event.".to_string()]
    );
    assert_eq!(failure.state["staged_main"]["original_name"], "report.pdf");
    // Rolled back along with the twin row; promoted copy removed
    assert_eq!(count_sources(&env.db, env.event_id).await, 0);
    assert_eq!(count_staged(&env.db, &batch).await, 1);
    assert_eq!(count_files(&env.media_root().join("sources")), 0);
}

#[tokio::test]
async fn test_update_rechecks_summary_inside_transaction() {
    let env = TestEnv::new().await;
    let created = env
        .workflow()
        .create(env.event_id, submission(form("Report", "Q1 review", "https://example.com/r")), env.admin.id)
        .await
        .unwrap();
    add_twin_writer(&env, "UPDATE", "Q2 review").await;

    let failure = expect_validation(
        env.workflow()
            .update(created.leader_id, submission(form("Report", "Q2 review", "https://example.com/r")), env.admin.id)
            .await
            .unwrap_err(),
    );
    assert!(failure.errors.has_field("summary"));

    let leader = sources::get(&env.db, created.leader_id).await.unwrap().unwrap();
    assert_eq!(leader.summary, "Q1 review");
    assert_eq!(count_sources(&env.db, env.event_id).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_creates_with_same_summary() {
    let env = TestEnv::new().await;

    let first = env.workflow();
    let second = env.workflow();
    let (a, b) = tokio::join!(
        first.create(env.event_id, submission(form("A", "Q1 review", "https://example.com/a")), env.admin.id),
        second.create(env.event_id, submission(form("B", " q1 review", "https://example.com/b")), env.admin.id),
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for result in results {
        if let Err(err) = result {
            assert!(expect_validation(err).errors.has_field("summary"));
        }
    }
    assert_eq!(count_sources(&env.db, env.event_id).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_updates_cannot_empty_bundle() {
    let env = TestEnv::new().await;

    let mut sub = submission(form("Report", "Q1 review", "https://example.com/r"));
    sub.extra_links = vec!["https://example.com/b".to_string(), "https://example.com/c".to_string()];
    let created = env.workflow().create(env.event_id, sub, env.admin.id).await.unwrap();
    let (b, c) = (created.created_ids[0], created.created_ids[1]);

    // Each update alone leaves one sibling; together they would leave none
    let mut drop_b = submission(form("Report", "Q1 review", ""));
    drop_b.remove_item_ids = vec![b];
    let mut drop_c = submission(form("Report", "Q1 review", ""));
    drop_c.remove_item_ids = vec![c];

    let first = env.workflow();
    let second = env.workflow();
    let (r1, r2) = tokio::join!(
        first.update(created.leader_id, drop_b, env.admin.id),
        second.update(created.leader_id, drop_c, env.admin.id),
    );

    let results = [r1, r2];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for result in results {
        if let Err(err) = result {
            assert_eq!(
                expect_validation(err).errors.non_field_errors,
                vec!["The bundle must keep at least one link or file.".to_string()]
            );
        }
    }
    assert_eq!(sources::count_active_attachments(&env.db, &created.bundle_id).await.unwrap(), 1);
}
