//! Pairing `client_documents` rows with the files actually on disk.
//!
//! Stored names drift out of sync with the uploads directory when files are
//! renamed by hand or copied in from another machine. `scan` reports the
//! damage; `plan` proposes repairs by matching abandoned rows against
//! orphaned files; `apply` writes the accepted proposals back in one
//! transaction and re-scans so a partial repair stays visible.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use sqlx::SqlitePool;
use unicode_normalization::UnicodeNormalization;

use super::{stamp_of, UploadEntry, UploadStore};
use crate::AppResult;

const PROBE_EXTENSIONS: [&str; 7] = ["pdf", "png", "jpg", "jpeg", "gif", "doc", "docx"];

#[derive(Debug, Clone, sqlx::FromRow)]
struct DocRow {
    id: String,
    stored_name: String,
    original_name: String,
    size_bytes: Option<i64>,
}

/// A row whose stored name has no file behind it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MissingDocument {
    pub id: String,
    pub stored_name: String,
    pub original_name: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SizeMismatch {
    pub id: String,
    pub stored_name: String,
    pub row_size_bytes: i64,
    pub disk_size_bytes: i64,
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct ScanReport {
    pub total_rows: u64,
    pub total_files: u64,
    pub matched: u64,
    pub missing: Vec<MissingDocument>,
    pub orphans: Vec<String>,
    pub size_mismatches: Vec<SizeMismatch>,
}

/// Which heuristic matched a row to an orphan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairRule {
    ExtensionProbe,
    OriginalStem,
    StoredNameContainment,
    DateStamp,
}

impl RepairRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairRule::ExtensionProbe => "extension_probe",
            RepairRule::OriginalStem => "original_stem",
            RepairRule::StoredNameContainment => "stored_name_containment",
            RepairRule::DateStamp => "date_stamp",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RepairProposal {
    pub document_id: String,
    pub from: String,
    pub to: String,
    pub rule: RepairRule,
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct RepairPlan {
    pub proposals: Vec<RepairProposal>,
    pub unresolved: Vec<MissingDocument>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RepairOutcome {
    pub applied: u64,
    pub remaining_missing: u64,
}

/// Compare document rows against the uploads inventory.
pub async fn scan(pool: &SqlitePool, store: &UploadStore) -> AppResult<ScanReport> {
    let rows = load_rows(pool).await?;
    let inventory = store.list()?;
    Ok(build_report(&rows, &inventory))
}

/// Scan, then propose a repair for every missing row. No writes.
pub async fn plan(pool: &SqlitePool, store: &UploadStore) -> AppResult<(ScanReport, RepairPlan)> {
    let rows = load_rows(pool).await?;
    let inventory = store.list()?;
    let report = build_report(&rows, &inventory);
    let plan = build_plan(store, &report.missing, &report.orphans);
    Ok((report, plan))
}

/// Plan and write the proposals back, one transaction for the lot.
///
/// `size_bytes` is refreshed from disk alongside each rename. The follow-up
/// scan's missing count is returned so callers can tell a clean repair from
/// a partial one.
pub async fn apply(
    pool: &SqlitePool,
    store: &UploadStore,
) -> AppResult<(RepairPlan, RepairOutcome)> {
    let rows = load_rows(pool).await?;
    let inventory = store.list()?;
    let report = build_report(&rows, &inventory);
    let plan = build_plan(store, &report.missing, &report.orphans);

    let sizes: BTreeMap<&str, i64> = inventory
        .iter()
        .map(|entry| (entry.name.as_str(), entry.size_bytes))
        .collect();

    let now = crate::time::now_ms();
    let mut tx = pool.begin().await?;
    for proposal in &plan.proposals {
        let size_bytes = sizes.get(proposal.to.as_str()).copied();
        sqlx::query(
            "UPDATE client_documents SET stored_name = ?1, size_bytes = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(&proposal.to)
        .bind(size_bytes)
        .bind(now)
        .bind(&proposal.document_id)
        .execute(&mut *tx)
        .await?;
        tracing::info!(
            target: "lawdesk",
            event = "repair_applied",
            rule = proposal.rule.as_str(),
            document_id = proposal.document_id.as_str(),
            from = proposal.from.as_str(),
            to = proposal.to.as_str(),
        );
    }
    tx.commit().await?;

    let after = scan(pool, store).await?;
    let outcome = RepairOutcome {
        applied: plan.proposals.len() as u64,
        remaining_missing: after.missing.len() as u64,
    };
    Ok((plan, outcome))
}

async fn load_rows(pool: &SqlitePool) -> AppResult<Vec<DocRow>> {
    // Oldest rows claim orphans first, keeping repeated runs deterministic.
    let rows = sqlx::query_as::<_, DocRow>(
        "SELECT id, stored_name, original_name, size_bytes FROM client_documents ORDER BY created_at, id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

fn build_report(rows: &[DocRow], inventory: &[UploadEntry]) -> ScanReport {
    let mut report = ScanReport {
        total_rows: rows.len() as u64,
        total_files: inventory.len() as u64,
        ..ScanReport::default()
    };
    let disk: BTreeMap<String, i64> = inventory
        .iter()
        .map(|entry| (nfc(&entry.name), entry.size_bytes))
        .collect();
    let mut claimed: BTreeSet<String> = BTreeSet::new();

    for row in rows {
        let key = nfc(&row.stored_name);
        match disk.get(&key) {
            Some(disk_size) => {
                report.matched += 1;
                if let Some(row_size) = row.size_bytes {
                    if row_size != *disk_size {
                        report.size_mismatches.push(SizeMismatch {
                            id: row.id.clone(),
                            stored_name: row.stored_name.clone(),
                            row_size_bytes: row_size,
                            disk_size_bytes: *disk_size,
                        });
                    }
                }
                claimed.insert(key);
            }
            None => report.missing.push(MissingDocument {
                id: row.id.clone(),
                stored_name: row.stored_name.clone(),
                original_name: row.original_name.clone(),
            }),
        }
    }

    for entry in inventory {
        if !claimed.contains(&nfc(&entry.name)) {
            report.orphans.push(entry.name.clone());
        }
    }

    report
}

fn build_plan(store: &UploadStore, missing: &[MissingDocument], orphans: &[String]) -> RepairPlan {
    // Orphans that would not pass the guard are never proposed as targets.
    let mut available: Vec<String> = orphans
        .iter()
        .filter(|name| store.check_name(name).is_ok())
        .cloned()
        .collect();

    let mut plan = RepairPlan::default();
    for row in missing {
        match propose(row, &available) {
            Some((idx, rule)) => {
                let to = available.remove(idx);
                plan.proposals.push(RepairProposal {
                    document_id: row.id.clone(),
                    from: row.stored_name.clone(),
                    to,
                    rule,
                });
            }
            None => plan.unresolved.push(row.clone()),
        }
    }
    plan
}

fn propose(row: &MissingDocument, available: &[String]) -> Option<(usize, RepairRule)> {
    let stored = row.stored_name.as_str();

    // H1: the stored name lost its extension somewhere along the way.
    if Path::new(stored).extension().is_none() {
        let mut exts: Vec<String> = PROBE_EXTENSIONS.iter().map(|e| (*e).to_string()).collect();
        if let Some(orig_ext) = Path::new(&row.original_name)
            .extension()
            .and_then(|e| e.to_str())
        {
            let orig_ext = orig_ext.to_ascii_lowercase();
            if !exts.iter().any(|e| *e == orig_ext) {
                exts.push(orig_ext);
            }
        }
        for ext in &exts {
            let candidate = fold(&format!("{stored}.{ext}"));
            if let Some(idx) = available.iter().position(|name| fold(name) == candidate) {
                return Some((idx, RepairRule::ExtensionProbe));
            }
        }
    }

    // H2: the upload was re-stamped but kept the original's stem.
    let original_stem = fold(stem(&row.original_name));
    if !original_stem.is_empty() {
        if let Some(idx) = available
            .iter()
            .position(|name| fold(name).contains(&original_stem))
        {
            return Some((idx, RepairRule::OriginalStem));
        }
    }

    // H3: containment between stored name and orphan, either direction.
    let stored_stem = fold(stem(stored));
    let stored_folded = fold(stored);
    if !stored_stem.is_empty() {
        if let Some(idx) = available.iter().position(|name| {
            fold(name).contains(&stored_stem) || stored_folded.contains(&fold(stem(name)))
        }) {
            return Some((idx, RepairRule::StoredNameContainment));
        }
    }

    // H4: both sides carry the same upload stamp.
    if let Some(stamp) = stamp_of(stored) {
        if let Some(idx) = available.iter().position(|name| name.contains(stamp)) {
            return Some((idx, RepairRule::DateStamp));
        }
    }

    None
}

fn stem(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
}

fn nfc(name: &str) -> String {
    name.nfc().collect()
}

fn fold(name: &str) -> String {
    name.nfc().collect::<String>().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    async fn seeded_pool(dir: &Path) -> SqlitePool {
        let pool = crate::db::open_pool(&dir.join("test.sqlite3"))
            .await
            .expect("open pool");
        crate::db::bootstrap(&pool).await.expect("bootstrap");
        sqlx::query(
            "INSERT INTO clients (id, first_name, last_name, created_at, updated_at) \
             VALUES ('c1', 'Layla', 'Haddad', 100, 100)",
        )
        .execute(&pool)
        .await
        .expect("seed client");
        pool
    }

    async fn insert_doc(
        pool: &SqlitePool,
        id: &str,
        stored: &str,
        original: &str,
        size: Option<i64>,
    ) {
        sqlx::query(
            "INSERT INTO client_documents \
             (id, document_type, stored_name, original_name, size_bytes, client_id, created_at, updated_at) \
             VALUES (?1, 'contract', ?2, ?3, ?4, 'c1', ?5, ?5)",
        )
        .bind(id)
        .bind(stored)
        .bind(original)
        .bind(size)
        .bind(crate::time::now_ms())
        .execute(pool)
        .await
        .expect("seed document");
    }

    #[tokio::test]
    async fn scan_classifies_rows_and_files() {
        let dir = tempdir().expect("tempdir");
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).expect("uploads dir");
        std::fs::write(uploads.join("kept.pdf"), b"data").expect("write kept");
        std::fs::write(uploads.join("stray.pdf"), b"stray").expect("write stray");

        let pool = seeded_pool(dir.path()).await;
        insert_doc(&pool, "d1", "kept.pdf", "kept.pdf", Some(10)).await;
        insert_doc(&pool, "d2", "gone.pdf", "gone.pdf", None).await;

        let store = UploadStore::new(&uploads);
        let report = scan(&pool, &store).await.expect("scan");
        assert_eq!(report.total_rows, 2);
        assert_eq!(report.total_files, 2);
        assert_eq!(report.matched, 1);
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].id, "d2");
        assert_eq!(report.orphans, vec!["stray.pdf".to_string()]);
        assert_eq!(report.size_mismatches.len(), 1);
        assert_eq!(report.size_mismatches[0].disk_size_bytes, 4);
    }

    #[tokio::test]
    async fn plan_probes_lost_extension_first() {
        let dir = tempdir().expect("tempdir");
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).expect("uploads dir");
        std::fs::write(uploads.join("20240101_120000_scan.pdf"), b"x").expect("write orphan");

        let pool = seeded_pool(dir.path()).await;
        insert_doc(&pool, "d1", "20240101_120000_scan", "scan.pdf", None).await;

        let store = UploadStore::new(&uploads);
        let (_, plan) = plan(&pool, &store).await.expect("plan");
        assert_eq!(plan.proposals.len(), 1);
        assert_eq!(plan.proposals[0].rule, RepairRule::ExtensionProbe);
        assert_eq!(plan.proposals[0].to, "20240101_120000_scan.pdf");
        assert!(plan.unresolved.is_empty());
    }

    #[tokio::test]
    async fn plan_matches_original_stem() {
        let dir = tempdir().expect("tempdir");
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).expect("uploads dir");
        std::fs::write(uploads.join("20240101_120000_Retainer.pdf"), b"x").expect("write orphan");

        let pool = seeded_pool(dir.path()).await;
        insert_doc(&pool, "d1", "garbled_row", "retainer.pdf", None).await;

        let store = UploadStore::new(&uploads);
        let (_, plan) = plan(&pool, &store).await.expect("plan");
        assert_eq!(plan.proposals.len(), 1);
        assert_eq!(plan.proposals[0].rule, RepairRule::OriginalStem);
        assert_eq!(plan.proposals[0].to, "20240101_120000_Retainer.pdf");
    }

    #[tokio::test]
    async fn plan_matches_stored_name_containment() {
        let dir = tempdir().expect("tempdir");
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).expect("uploads dir");
        std::fs::write(uploads.join("20240101_120000_gamma_notes.pdf"), b"x")
            .expect("write orphan");

        let pool = seeded_pool(dir.path()).await;
        insert_doc(&pool, "d1", "gamma_notes.pdf", "unrelated.bin", None).await;

        let store = UploadStore::new(&uploads);
        let (_, plan) = plan(&pool, &store).await.expect("plan");
        assert_eq!(plan.proposals.len(), 1);
        assert_eq!(plan.proposals[0].rule, RepairRule::StoredNameContainment);
    }

    #[tokio::test]
    async fn plan_falls_back_to_date_stamp() {
        let dir = tempdir().expect("tempdir");
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).expect("uploads dir");
        std::fs::write(uploads.join("renamed_20240309_101500.bin"), b"x").expect("write orphan");

        let pool = seeded_pool(dir.path()).await;
        insert_doc(&pool, "d1", "20240309_101500_old.pdf", "zzz.dat", None).await;

        let store = UploadStore::new(&uploads);
        let (_, plan) = plan(&pool, &store).await.expect("plan");
        assert_eq!(plan.proposals.len(), 1);
        assert_eq!(plan.proposals[0].rule, RepairRule::DateStamp);
    }

    #[tokio::test]
    async fn orphan_is_consumed_by_at_most_one_row() {
        let dir = tempdir().expect("tempdir");
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).expect("uploads dir");
        std::fs::write(uploads.join("20240101_120000_shared.pdf"), b"x").expect("write orphan");

        let pool = seeded_pool(dir.path()).await;
        insert_doc(&pool, "d1", "lost_one", "shared.pdf", None).await;
        insert_doc(&pool, "d2", "lost_two", "shared.pdf", None).await;

        let store = UploadStore::new(&uploads);
        let (_, plan) = plan(&pool, &store).await.expect("plan");
        assert_eq!(plan.proposals.len(), 1);
        assert_eq!(plan.proposals[0].document_id, "d1");
        assert_eq!(plan.unresolved.len(), 1);
        assert_eq!(plan.unresolved[0].id, "d2");
    }

    #[tokio::test]
    async fn guard_failing_candidates_are_skipped() {
        let dir = tempdir().expect("tempdir");
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).expect("uploads dir");
        // Legal on ext4, rejected by the portable-name guard.
        std::fs::write(uploads.join("bad:name.pdf"), b"x").expect("write orphan");

        let pool = seeded_pool(dir.path()).await;
        insert_doc(&pool, "d1", "lost_row", "bad name.pdf", None).await;

        let store = UploadStore::new(&uploads);
        let (report, plan) = plan(&pool, &store).await.expect("plan");
        assert_eq!(report.orphans.len(), 1);
        assert!(plan.proposals.is_empty());
        assert_eq!(plan.unresolved.len(), 1);
    }

    #[tokio::test]
    async fn apply_renames_rows_and_rescans() {
        let dir = tempdir().expect("tempdir");
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).expect("uploads dir");
        std::fs::write(uploads.join("20240101_120000_deed.pdf"), b"12345678").expect("write");

        let pool = seeded_pool(dir.path()).await;
        insert_doc(&pool, "d1", "20240101_120000_deed", "deed.pdf", Some(3)).await;
        insert_doc(&pool, "d2", "vanished.pdf", "vanished.pdf", None).await;

        let store = UploadStore::new(&uploads);
        let (plan, outcome) = apply(&pool, &store).await.expect("apply");
        assert_eq!(plan.proposals.len(), 1);
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.remaining_missing, 1);

        let (stored_name, size_bytes): (String, Option<i64>) = sqlx::query_as(
            "SELECT stored_name, size_bytes FROM client_documents WHERE id = 'd1'",
        )
        .fetch_one(&pool)
        .await
        .expect("reload row");
        assert_eq!(stored_name, "20240101_120000_deed.pdf");
        assert_eq!(size_bytes, Some(8));
    }
}
