use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;

use lawdesk_lib::db::guard::{DB_UNHEALTHY_CLI_HINT, DB_UNHEALTHY_CODE, DB_UNHEALTHY_EXIT_CODE};
use lawdesk_lib::db::health::{run_health_checks, DbHealthReport, DbHealthStatus};
use lawdesk_lib::db::{backup, export};
use lawdesk_lib::uploads::{reconcile, UploadStore};
use lawdesk_lib::{db, paths, reports, store};

#[derive(Debug, Parser)]
#[command(
    name = "lawdesk",
    about = "Law-office records: API server and maintenance tools",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API server.
    Serve {
        /// Listen address, e.g. 127.0.0.1:8787. Overrides LAWDESK_BIND.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print the dashboard overview: counts, today's calendar, receivables.
    Report {
        /// Emit the overview as JSON instead of the table view.
        #[arg(long)]
        json: bool,
    },
    /// Database maintenance and inspection commands.
    #[command(subcommand)]
    Db(DbCommand),
    /// Uploads-directory inspection and filename repair.
    #[command(subcommand)]
    Files(FilesCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply the baseline schema and seed the admin user.
    Init,
    /// Run the SQLite health checks and report their status.
    Status {
        /// Emit the raw JSON health report instead of the table view.
        #[arg(long)]
        json: bool,
    },
    /// Run VACUUM plus a WAL checkpoint to compact the database.
    Vacuum,
    /// Create a consistent snapshot of the database with manifest metadata.
    Backup {
        /// Emit a machine-readable JSON object with the snapshot details.
        #[arg(long)]
        json: bool,
        /// List existing snapshots and retention headroom; creates nothing.
        #[arg(long)]
        list: bool,
    },
    /// Dump every domain table into one JSON export file.
    Export {
        /// Directory for the export file (default <data-dir>/exports).
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Replace the full domain state with the contents of an export file.
    Restore {
        file: PathBuf,
        /// Actually apply. Without it the plan is printed and nothing changes.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
enum FilesCommand {
    /// Compare document rows against the uploads directory.
    Status {
        /// Emit the scan report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Propose filename repairs for rows whose file is missing.
    Repair {
        /// Write the proposed renames to the database. Default is dry-run.
        #[arg(long)]
        apply: bool,
        /// Emit the plan (and outcome with --apply) as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _log_guard = match lawdesk_lib::logging::init() {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<u8> {
    match command {
        Commands::Serve { bind } => handle_serve(bind).await,
        Commands::Report { json } => handle_report(json).await,
        Commands::Db(db) => handle_db_command(db).await,
        Commands::Files(files) => handle_files_command(files).await,
    }
}

/// Open the database and make sure the baseline schema is in place.
async fn open_db() -> Result<(SqlitePool, PathBuf)> {
    let db_path = paths::db_path().context("determine database path")?;
    let pool = db::open_pool(&db_path).await?;
    db::bootstrap(&pool).await.context("apply baseline schema")?;
    Ok((pool, db_path))
}

fn upload_store() -> Result<UploadStore> {
    let dir = paths::uploads_dir().context("determine uploads directory")?;
    Ok(UploadStore::new(dir))
}

/// Health gate for mutating subcommands. Returns the exit code instead of
/// the pool when the checks fail, so the caller can bail with status 2.
async fn guard_cli_db_mutation(pool: SqlitePool, db_path: &Path) -> Result<Result<SqlitePool, u8>> {
    let report = run_health_checks(&pool, db_path)
        .await
        .context("run database health checks")?;
    if !matches!(report.status, DbHealthStatus::Ok) {
        eprintln!("Error: {DB_UNHEALTHY_CODE}. {DB_UNHEALTHY_CLI_HINT}");
        pool.close().await;
        return Ok(Err(DB_UNHEALTHY_EXIT_CODE as u8));
    }
    Ok(Ok(pool))
}

async fn handle_serve(bind: Option<String>) -> Result<u8> {
    let addr: std::net::SocketAddr = bind
        .or_else(|| std::env::var("LAWDESK_BIND").ok())
        .unwrap_or_else(|| "127.0.0.1:8787".to_string())
        .parse()
        .context("parse listen address")?;

    let (pool, db_path) = open_db().await?;
    if let Some(admin) = store::users::ensure_admin_user(&pool).await? {
        tracing::info!(target: "lawdesk", event = "admin_ready", username = %admin.username);
    }
    let uploads = upload_store()?;
    uploads.ensure_root()?;

    let report = run_health_checks(&pool, &db_path)
        .await
        .context("run database health checks")?;
    if !matches!(report.status, DbHealthStatus::Ok) {
        eprintln!(
            "Warning: database health checks failed; the API starts read-only. {DB_UNHEALTHY_CLI_HINT}"
        );
    }

    let state = lawdesk_lib::AppState::new(pool, db_path, uploads, report);
    lawdesk_lib::http::serve(state, addr).await?;
    Ok(0)
}

async fn handle_report(json: bool) -> Result<u8> {
    let (pool, _db_path) = open_db().await?;
    let uploads = upload_store()?;
    let overview = reports::overview(&pool, &uploads).await?;
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&overview)?);
        return Ok(0);
    }

    println!("Lawdesk overview ({})", overview.generated_at);
    println!("Clients      : {}", overview.clients);
    println!("Users        : {}", overview.users);
    println!(
        "Cases        : {} (active {}, closed {}, suspended {})",
        overview.cases.total, overview.cases.active, overview.cases.closed, overview.cases.suspended
    );
    match &overview.appointments.next_upcoming {
        Some(next) => println!(
            "Appointments : {} (today {}, next \"{}\" at {})",
            overview.appointments.total,
            overview.appointments.today,
            next.title,
            lawdesk_lib::time::fmt_ms(next.scheduled_at)
        ),
        None => println!(
            "Appointments : {} (today {}, nothing scheduled ahead)",
            overview.appointments.total, overview.appointments.today
        ),
    }
    println!(
        "Invoices     : {} (pending {}, paid {}, overdue {}, cancelled {})",
        overview.invoices.total,
        overview.invoices.pending,
        overview.invoices.paid,
        overview.invoices.overdue,
        overview.invoices.cancelled
    );
    println!(
        "Receivables  : {} invoices, {} outstanding",
        overview.receivables.outstanding_invoices,
        format_cents(overview.receivables.outstanding_cents)
    );
    println!("Documents    : {}", overview.documents);
    println!(
        "Uploads      : {} files, {}, {} rows missing a file",
        overview.uploads.files,
        backup::format_bytes(overview.uploads.total_bytes.max(0) as u64),
        overview.uploads.missing_rows
    );
    Ok(0)
}

async fn handle_db_command(command: DbCommand) -> Result<u8> {
    match command {
        DbCommand::Init => {
            let db_path = paths::db_path().context("determine database path")?;
            let pool = db::open_pool(&db_path).await?;
            let pool = match guard_cli_db_mutation(pool, &db_path).await? {
                Ok(pool) => pool,
                Err(code) => return Ok(code),
            };
            db::bootstrap(&pool).await.context("apply baseline schema")?;
            match store::users::ensure_admin_user(&pool).await? {
                Some(user) => println!("Seeded admin user \"{}\".", user.username),
                None => println!("Admin user already present."),
            }
            pool.close().await;
            println!("Database ready at {}", db_path.display());
            Ok(0)
        }
        DbCommand::Status { json } => {
            let db_path = paths::db_path().context("determine database path")?;
            let pool = db::open_pool(&db_path).await?;
            let report = run_health_checks(&pool, &db_path)
                .await
                .context("run database health checks")?;
            pool.close().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report_table(&report);
            }
            Ok(match report.status {
                DbHealthStatus::Ok => 0,
                DbHealthStatus::Error => 1,
            })
        }
        DbCommand::Vacuum => {
            let db_path = paths::db_path().context("determine database path")?;
            let pool = db::open_pool(&db_path).await?;
            let pool = match guard_cli_db_mutation(pool, &db_path).await? {
                Ok(pool) => pool,
                Err(code) => return Ok(code),
            };
            let summary = db::vacuum(&pool, &db_path).await?;
            pool.close().await;
            println!(
                "Vacuum completed in {} ms: {} -> {}.",
                summary.duration_ms,
                backup::format_bytes(summary.size_before_bytes.max(0) as u64),
                backup::format_bytes(summary.size_after_bytes.max(0) as u64)
            );
            Ok(0)
        }
        DbCommand::Backup { json, list } => {
            let db_path = paths::db_path().context("determine database path")?;
            if list {
                let info = backup::overview(&db_path).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&info)?);
                } else {
                    print_backup_overview(&info);
                }
                return Ok(0);
            }

            let pool = db::open_pool(&db_path).await?;
            let pool = match guard_cli_db_mutation(pool, &db_path).await? {
                Ok(pool) => pool,
                Err(code) => return Ok(code),
            };
            let uploads_dir = paths::uploads_dir().context("determine uploads directory")?;
            let entry = backup::create_backup(&pool, &db_path, &uploads_dir).await?;
            pool.close().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&entry.manifest)?);
                println!("Backup stored at {}", entry.sqlite_path);
            }
            Ok(0)
        }
        DbCommand::Export { out } => {
            let (pool, _db_path) = open_db().await?;
            let out_parent = match out {
                Some(dir) => dir,
                None => paths::data_dir()
                    .context("determine data directory")?
                    .join("exports"),
            };
            let summary = export::create_export(&pool, &out_parent).await?;
            pool.close().await;
            println!(
                "Exported {} rows ({}) to {}",
                summary.total_rows,
                backup::format_bytes(summary.size_bytes),
                summary.path
            );
            Ok(0)
        }
        DbCommand::Restore { file, yes } => {
            let (pool, db_path) = open_db().await?;

            if !yes {
                let doc = export::read_export(&file)?;
                println!(
                    "Restore plan for {} (export generated {}):",
                    file.display(),
                    doc.generated_at
                );
                let mut total = 0_usize;
                for (table, rows) in &doc.tables {
                    println!("  {:<18} {:>6} rows", table, rows.len());
                    total += rows.len();
                }
                println!(
                    "This REPLACES all {} current tables with the {} rows above.",
                    db::DOMAIN_TABLES.len(),
                    total
                );
                println!("Nothing was changed. Re-run with --yes to apply.");
                pool.close().await;
                return Ok(1);
            }

            let summary = export::restore(&pool, &file).await?;
            let report = run_health_checks(&pool, &db_path)
                .await
                .context("run post-restore health checks")?;
            pool.close().await;
            println!(
                "Restored {} rows from {} (export generated {}).",
                summary.total_rows, summary.path, summary.generated_at
            );
            println!("Post-restore health: {}", status_label(&report.status));
            Ok(match report.status {
                DbHealthStatus::Ok => 0,
                DbHealthStatus::Error => 1,
            })
        }
    }
}

async fn handle_files_command(command: FilesCommand) -> Result<u8> {
    match command {
        FilesCommand::Status { json } => {
            let (pool, _db_path) = open_db().await?;
            let uploads = upload_store()?;
            let report = reconcile::scan(&pool, &uploads).await?;
            pool.close().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(0);
            }
            println!(
                "Uploads scan: {} rows, {} files",
                report.total_rows, report.total_files
            );
            println!("  matched         : {}", report.matched);
            println!("  missing         : {}", report.missing.len());
            println!("  orphan files    : {}", report.orphans.len());
            println!("  size mismatches : {}", report.size_mismatches.len());
            for row in &report.missing {
                println!(
                    "  missing: {}  stored \"{}\"  original \"{}\"",
                    row.id, row.stored_name, row.original_name
                );
            }
            Ok(0)
        }
        FilesCommand::Repair { apply, json } => {
            let (pool, db_path) = open_db().await?;
            let uploads = upload_store()?;

            if !apply {
                let (scan, plan) = reconcile::plan(&pool, &uploads).await?;
                pool.close().await;
                if json {
                    let payload = serde_json::json!({ "scan": scan, "plan": plan });
                    println!("{}", serde_json::to_string_pretty(&payload)?);
                    return Ok(0);
                }
                if plan.proposals.is_empty() && plan.unresolved.is_empty() {
                    println!("Nothing to repair: every document row has its file.");
                    return Ok(0);
                }
                for proposal in &plan.proposals {
                    println!(
                        "would rename \"{}\" -> \"{}\"  [{}]  row {}",
                        proposal.from,
                        proposal.to,
                        proposal.rule.as_str(),
                        proposal.document_id
                    );
                }
                for row in &plan.unresolved {
                    println!(
                        "unresolved: {}  stored \"{}\"  original \"{}\"",
                        row.id, row.stored_name, row.original_name
                    );
                }
                println!(
                    "{} proposal(s), {} unresolved. Dry run; re-run with --apply to write.",
                    plan.proposals.len(),
                    plan.unresolved.len()
                );
                return Ok(0);
            }

            let pool = match guard_cli_db_mutation(pool, &db_path).await? {
                Ok(pool) => pool,
                Err(code) => return Ok(code),
            };
            let (plan, outcome) = reconcile::apply(&pool, &uploads).await?;
            pool.close().await;

            if json {
                let payload = serde_json::json!({ "plan": plan, "outcome": outcome });
                println!("{}", serde_json::to_string_pretty(&payload)?);
                return Ok(0);
            }
            for proposal in &plan.proposals {
                println!(
                    "renamed \"{}\" -> \"{}\"  [{}]  row {}",
                    proposal.from,
                    proposal.to,
                    proposal.rule.as_str(),
                    proposal.document_id
                );
            }
            println!(
                "Applied {} repair(s); {} row(s) still missing a file.",
                outcome.applied, outcome.remaining_missing
            );
            Ok(0)
        }
    }
}

fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

fn print_backup_overview(info: &backup::BackupOverview) {
    println!(
        "Retention: keep {} snapshots, {} max",
        info.retention_max_count,
        backup::format_bytes(info.retention_max_bytes)
    );
    println!(
        "Disk: {} available, database {}, {} required for a new snapshot",
        backup::format_bytes(info.available_bytes),
        backup::format_bytes(info.db_size_bytes),
        backup::format_bytes(info.required_free_bytes)
    );
    if info.backups.is_empty() {
        println!("No snapshots yet.");
        return;
    }
    println!("\n{:<26} {:>10}  Directory", "Created", "Size");
    for entry in &info.backups {
        println!(
            "{:<26} {:>10}  {}",
            entry.manifest.created_at,
            backup::format_bytes(entry.total_size_bytes),
            entry.directory
        );
    }
}

fn print_report_table(report: &DbHealthReport) {
    println!("Database health report");
    println!("Status       : {}", status_label(&report.status));
    println!("Schema hash  : {}", report.schema_hash);
    println!("App version  : {}", report.app_version);
    println!("Generated at : {}", report.generated_at);

    println!("\nChecks:");
    println!(
        "{:<20} {:<7} {:>13}  Details",
        "Check", "Passed", "Duration (ms)"
    );
    for check in &report.checks {
        let passed = if check.passed { "yes" } else { "no" };
        let details = check
            .details
            .as_deref()
            .map(|value| value.replace('\n', " "))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<7} {:>13}  {}",
            check.name, passed, check.duration_ms, details
        );
    }

    if report.offenders.is_empty() {
        println!("\nOffenders: none");
    } else {
        println!("\nOffenders:");
        println!("{:<20} {:>10}  Message", "Table", "RowID");
        for offender in &report.offenders {
            println!(
                "{:<20} {:>10}  {}",
                offender.table,
                offender.rowid,
                offender.message.replace('\n', " ")
            );
        }
    }
}

fn status_label(status: &DbHealthStatus) -> &'static str {
    match status {
        DbHealthStatus::Ok => "ok",
        DbHealthStatus::Error => "error",
    }
}
