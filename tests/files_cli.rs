use std::path::Path;

use anyhow::Result;
use assert_cmd::Command;
use tempfile::tempdir;

use lawdesk_lib::store;
use lawdesk_lib::uploads::UploadStore;

fn lawdesk(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("lawdesk").expect("binary under test");
    cmd.env("LAWDESK_DATA_DIR", data_dir);
    cmd
}

/// One matched document, one whose stored name lost its extension, and the
/// orphaned file that row should be re-pointed at.
async fn seed_office(data: &Path) -> Result<()> {
    let pool = lawdesk_lib::db::open_pool(&data.join("lawdesk.sqlite3")).await?;
    lawdesk_lib::db::bootstrap(&pool).await?;

    let uploads_dir = data.join("uploads");
    std::fs::create_dir_all(&uploads_dir)?;
    std::fs::write(uploads_dir.join("kept.pdf"), b"12345")?;
    std::fs::write(uploads_dir.join("20240101_120000_scan.pdf"), b"abc")?;
    let uploads = UploadStore::new(&uploads_dir);

    let client = store::clients::create(
        &pool,
        store::clients::NewClient {
            first_name: "Layla".into(),
            last_name: "Haddad".into(),
            ..Default::default()
        },
    )
    .await?;
    store::documents::create(
        &pool,
        &uploads,
        store::documents::NewDocument {
            document_type: "contract".into(),
            original_name: "kept.pdf".into(),
            stored_name: Some("kept.pdf".into()),
            client_id: client.id.clone(),
            ..Default::default()
        },
    )
    .await?;
    store::documents::create(
        &pool,
        &uploads,
        store::documents::NewDocument {
            document_type: "other".into(),
            original_name: "scan.pdf".into(),
            stored_name: Some("20240101_120000_scan".into()),
            client_id: client.id,
            ..Default::default()
        },
    )
    .await?;
    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn files_status_reports_missing_and_orphans() -> Result<()> {
    let tmp = tempdir()?;
    let data = tmp.path().join("data");
    seed_office(&data).await?;

    let output = lawdesk(&data).args(["files", "status"]).output()?;
    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Uploads scan: 2 rows, 2 files"));
    assert!(stdout.contains("matched         : 1"));
    assert!(stdout.contains("missing         : 1"));
    assert!(stdout.contains("orphan files    : 1"));

    let json_output = lawdesk(&data).args(["files", "status", "--json"]).output()?;
    assert!(json_output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&json_output.stdout)?;
    assert_eq!(report["total_rows"], 2);
    assert_eq!(report["matched"], 1);
    assert_eq!(report["missing"][0]["stored_name"], "20240101_120000_scan");
    assert_eq!(report["orphans"][0], "20240101_120000_scan.pdf");
    Ok(())
}

#[tokio::test]
async fn files_repair_dry_run_then_apply() -> Result<()> {
    let tmp = tempdir()?;
    let data = tmp.path().join("data");
    seed_office(&data).await?;

    let dry = lawdesk(&data).args(["files", "repair"]).output()?;
    assert!(
        dry.status.success(),
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&dry.stdout),
        String::from_utf8_lossy(&dry.stderr)
    );
    let stdout = String::from_utf8_lossy(&dry.stdout);
    assert!(stdout
        .contains("would rename \"20240101_120000_scan\" -> \"20240101_120000_scan.pdf\""));
    assert!(stdout.contains("[extension_probe]"));
    assert!(stdout.contains("Dry run; re-run with --apply to write."));

    let dry_json = lawdesk(&data).args(["files", "repair", "--json"]).output()?;
    assert!(dry_json.status.success());
    let payload: serde_json::Value = serde_json::from_slice(&dry_json.stdout)?;
    assert_eq!(payload["plan"]["proposals"][0]["rule"], "extension_probe");

    // The dry run must not have written anything.
    let db_path = data.join("lawdesk.sqlite3");
    let pool = lawdesk_lib::db::open_pool(&db_path).await?;
    let stored: String =
        sqlx::query_scalar("SELECT stored_name FROM client_documents WHERE original_name = 'scan.pdf'")
            .fetch_one(&pool)
            .await?;
    pool.close().await;
    assert_eq!(stored, "20240101_120000_scan");

    let apply = lawdesk(&data).args(["files", "repair", "--apply"]).output()?;
    assert!(
        apply.status.success(),
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&apply.stdout),
        String::from_utf8_lossy(&apply.stderr)
    );
    let stdout = String::from_utf8_lossy(&apply.stdout);
    assert!(stdout.contains("renamed \"20240101_120000_scan\" -> \"20240101_120000_scan.pdf\""));
    assert!(stdout.contains("Applied 1 repair(s); 0 row(s) still missing a file."));

    let pool = lawdesk_lib::db::open_pool(&db_path).await?;
    let (stored, size): (String, Option<i64>) = sqlx::query_as(
        "SELECT stored_name, size_bytes FROM client_documents WHERE original_name = 'scan.pdf'",
    )
    .fetch_one(&pool)
    .await?;
    pool.close().await;
    assert_eq!(stored, "20240101_120000_scan.pdf");
    assert_eq!(size, Some(3));
    Ok(())
}

#[test]
fn files_repair_with_nothing_to_do_says_so() -> Result<()> {
    let tmp = tempdir()?;
    let data = tmp.path().join("data");
    assert!(lawdesk(&data).args(["db", "init"]).output()?.status.success());

    let output = lawdesk(&data).args(["files", "repair"]).output()?;
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout)
        .contains("Nothing to repair: every document row has its file."));
    Ok(())
}
