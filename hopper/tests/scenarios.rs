use std::fs;
use crate::common::{self, Fixture};

///
/// Scenario 1: a clean file lands every row and the watch copy is removed.
///
#[tokio::test]
async fn test_clean_file_loads_every_row() {
    let fixture = Fixture::new(&common::widgets_sources(0.1));
    fixture.drop_file("widgets_ok.csv", "id,name\n1,a\n2,b\n3,c\n");

    fixture.run_once().await;

    let db = fixture.db().await;
    assert_eq!(3, common::count(&db, "SELECT COUNT(*) FROM widgets").await);
    assert_eq!(1, common::count(&db, "SELECT COUNT(*) FROM widgets WHERE id = 1 AND name = 'a'").await);
    assert_eq!(1, common::count(&db, "SELECT COUNT(*) FROM widgets WHERE id = 3 AND name = 'c'").await);
    assert_eq!(3, common::count(&db, "SELECT COUNT(*) FROM widgets WHERE source_filename = 'widgets_ok.csv'").await);

    let logs = common::log_rows(&db, "widgets_ok.csv").await;
    assert_eq!(1, logs.len());
    assert_eq!("success", logs[0].status);
    assert_eq!(Some(3), logs[0].records_processed);
    assert_eq!(Some(0), logs[0].validation_errors);
    assert_eq!(Some(3), logs[0].staged);
    assert_eq!(Some(3), logs[0].inserted);
    assert_eq!(Some(0), logs[0].updated);

    // Source file deleted, archive copy retained, no stage left behind.
    assert!(!fixture.watch_path("widgets_ok.csv").exists());
    assert_eq!(1, fixture.archived_files().len());
    assert!(fixture.archived_files()[0].starts_with("widgets_ok.csv."));
    common::assert_no_stage_tables(&db).await;
}

///
/// Scenario 2: a row that fails coercion goes to the dead-letter table and
/// the rest of the file still lands.
///
#[tokio::test]
async fn test_partial_file_dead_letters_the_bad_row() {
    let fixture = Fixture::new(&common::widgets_sources(0.5));
    fixture.drop_file("widgets_partial.csv", "id,name\n1,a\nx,b\n3,c\n");

    fixture.run_once().await;

    let db = fixture.db().await;
    assert_eq!(2, common::count(&db, "SELECT COUNT(*) FROM widgets").await);
    assert_eq!(0, common::count(&db, "SELECT COUNT(*) FROM widgets WHERE name = 'b'").await);

    assert_eq!(1, common::count(&db, "SELECT COUNT(*) FROM dead_letter_queue").await);
    assert_eq!(1, common::count(&db,
        "SELECT COUNT(*) FROM dead_letter_queue WHERE source_filename = 'widgets_partial.csv' \
         AND file_row_number = 2 AND target_table_name = 'widgets' \
         AND validation_errors LIKE '%int_parsing%'").await);

    let logs = common::log_rows(&db, "widgets_partial.csv").await;
    assert_eq!("success", logs[0].status);
    assert_eq!(Some(3), logs[0].records_processed);
    assert_eq!(Some(1), logs[0].validation_errors);
    assert_eq!(Some(2), logs[0].staged);
}

///
/// Scenario 3: too many bad rows breaches the threshold - nothing is
/// published, the dead letters document the failure, the file stays put.
///
#[tokio::test]
async fn test_threshold_breach_fails_the_file() {
    let fixture = Fixture::new(&common::widgets_sources(0.1));
    fixture.drop_file("widgets_overrun.csv", "id,name\n1,a\nx,b\ny,c\nz,d\n");

    fixture.run_once().await;

    let db = fixture.db().await;
    assert_eq!(0, common::count(&db, "SELECT COUNT(*) FROM widgets").await);
    assert_eq!(3, common::count(&db, "SELECT COUNT(*) FROM dead_letter_queue").await);

    let logs = common::log_rows(&db, "widgets_overrun.csv").await;
    assert_eq!("failed", logs[0].status);
    assert_eq!(Some("threshold-exceeded".to_string()), logs[0].error_kind);

    assert!(fixture.watch_path("widgets_overrun.csv").exists());
    common::assert_no_stage_tables(&db).await;
}

///
/// Scenario 4: duplicated grain keys in the stage stop the merge.
///
#[tokio::test]
async fn test_duplicate_grain_keys_fail_the_audit() {
    let fixture = Fixture::new(&common::widgets_sources(0.1));
    fixture.drop_file("widgets_dupkey.csv", "id,name\n1,a\n1,b\n");

    fixture.run_once().await;

    let db = fixture.db().await;
    assert_eq!(0, common::count(&db, "SELECT COUNT(*) FROM widgets").await);

    let logs = common::log_rows(&db, "widgets_dupkey.csv").await;
    assert_eq!("failed", logs[0].status);
    assert_eq!(Some("grain-duplicates".to_string()), logs[0].error_kind);

    assert!(fixture.watch_path("widgets_dupkey.csv").exists());
    common::assert_no_stage_tables(&db).await;
}

///
/// Scenario 5: restoring an already-loaded file short-circuits into the
/// duplicates folder without touching the target or the dead letters.
///
#[tokio::test]
async fn test_reprocessing_a_loaded_file_is_skipped() {
    let fixture = Fixture::new(&common::widgets_sources(0.1));
    fixture.drop_file("widgets_ok.csv", "id,name\n1,a\n2,b\n3,c\n");
    fixture.run_once().await;

    // Restore the archived copy under its original name.
    let archived = fixture.archived_files().into_iter().next().unwrap();
    fs::copy(fixture.dir.path().join("archive").join(archived), fixture.watch_path("widgets_ok.csv")).unwrap();

    fixture.run_once().await;

    let db = fixture.db().await;
    assert_eq!(3, common::count(&db, "SELECT COUNT(*) FROM widgets").await);
    assert_eq!(0, common::count(&db, "SELECT COUNT(*) FROM dead_letter_queue").await);

    let logs = common::log_rows(&db, "widgets_ok.csv").await;
    assert_eq!(2, logs.len());
    assert_eq!("success", logs[0].status);
    assert_eq!("duplicate_skipped", logs[1].status);

    assert!(!fixture.watch_path("widgets_ok.csv").exists());
    assert_eq!(vec!("widgets_ok.csv".to_string()), fixture.duplicate_files());
}

///
/// Scenario 6: ten concurrent files, eight good and two with broken headers.
/// Failures stay isolated and every file gets exactly one log row.
///
#[tokio::test]
async fn test_concurrent_files_with_isolated_failures() {
    let fixture = Fixture::new(&common::widgets_sources(0.1));

    for file in 0..8 {
        let base = file * 10;
        fixture.drop_file(
            &format!("widgets_c{}.csv", file),
            &format!("id,name\n{},a\n{},b\n{},c\n", base + 1, base + 2, base + 3));
    }
    fixture.drop_file("widgets_bad1.csv", "wrong,name\n1,a\n");
    fixture.drop_file("widgets_bad2.csv", "wrong,name\n2,b\n");

    fixture.run_once().await;

    let db = fixture.db().await;
    assert_eq!(24, common::count(&db, "SELECT COUNT(*) FROM widgets").await);
    assert_eq!(10, common::count(&db, "SELECT COUNT(*) FROM file_load_log").await);
    assert_eq!(8, common::count(&db, "SELECT COUNT(*) FROM file_load_log WHERE status = 'success'").await);
    assert_eq!(2, common::count(&db,
        "SELECT COUNT(*) FROM file_load_log WHERE status = 'failed' AND error_kind = 'missing-columns'").await);

    // The broken files are left in the watch folder for the operator.
    assert!(fixture.watch_path("widgets_bad1.csv").exists());
    assert!(fixture.watch_path("widgets_bad2.csv").exists());
    assert!(!fixture.watch_path("widgets_c0.csv").exists());

    common::assert_no_stage_tables(&db).await;
}

///
/// A configured user audit gates the merge: a failing check rolls the whole
/// file back.
///
#[tokio::test]
async fn test_user_audit_failure_blocks_the_merge() {
    let sources = r#"
sources:
  - name: widgets
    pattern: "widgets*.csv"
    format: delimited
    table: widgets
    grain: [id]
    audit: "SELECT CASE WHEN COUNT(*) = 0 THEN 1 ELSE 0 END AS no_negative_ids FROM {table} WHERE id < 0"
    schema:
      - { name: id, data_type: integer, required: true }
      - { name: name, data_type: string }
"#;
    let fixture = Fixture::new(sources);
    fixture.drop_file("widgets_neg.csv", "id,name\n-1,a\n2,b\n");

    fixture.run_once().await;

    let db = fixture.db().await;
    assert_eq!(0, common::count(&db, "SELECT COUNT(*) FROM widgets").await);

    let logs = common::log_rows(&db, "widgets_neg.csv").await;
    assert_eq!("failed", logs[0].status);
    assert_eq!(Some("audit-failed".to_string()), logs[0].error_kind);
}

///
/// JSON sources stream objects from the configured array.
///
#[tokio::test]
async fn test_json_source_loads() {
    let sources = r#"
sources:
  - name: gadgets
    pattern: "gadgets*.json"
    format: json
    table: gadgets
    grain: [id]
    json_path: data.rows
    schema:
      - { name: id, data_type: integer, required: true }
      - { name: name, data_type: string }
"#;
    let fixture = Fixture::new(sources);
    fixture.drop_file("gadgets_1.json", r#"{"data": {"rows": [{"id": 1, "name": "a"}, {"id": 2, "name": "b"}]}}"#);

    fixture.run_once().await;

    let db = fixture.db().await;
    assert_eq!(2, common::count(&db, "SELECT COUNT(*) FROM gadgets").await);

    let logs = common::log_rows(&db, "gadgets_1.json").await;
    assert_eq!("success", logs[0].status);
    assert_eq!(Some(2), logs[0].inserted);
}
