//! pagewatch CLI — operator interface to the change-tracking pipeline.

use clap::{Parser, Subcommand};
use pagewatch_rs::config::Config;
use pagewatch_rs::db::Db;
use pagewatch_rs::db::backlog::{DIFF_BACKLOG, SNAPSHOT_BACKLOG};
use pagewatch_rs::db::pages::PageResult;
use pagewatch_rs::differ::HttpDiffer;
use pagewatch_rs::error::Error;
use pagewatch_rs::model::{DiffId, PageId, PageMetadata};
use pagewatch_rs::pipeline::{DiffWorker, ScoreWorker, WorkerConfig};
use pagewatch_rs::scorer::ConstantScorer;
use pagewatch_rs::storage::DiffStore;
use pagewatch_rs::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "pagewatch", about = "Track page changes from capture to review")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline workers as a daemon
    Serve {
        /// Directory for stored diff payloads
        #[arg(long, default_value = "diff-payloads")]
        payload_dir: PathBuf,
    },
    /// Database operations
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
    /// Monitored page operations
    Page {
        #[command(subcommand)]
        action: PageAction,
    },
    /// Ingest a capture of a monitored page
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
    /// Diff pipeline operations
    Diff {
        #[command(subcommand)]
        action: DiffAction,
    },
    /// Reviewer work queue operations
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },
}

#[derive(Subcommand)]
enum DbAction {
    /// Run pending migrations and create backlogs
    Migrate,
}

#[derive(Subcommand)]
enum PageAction {
    /// Register a URL for monitoring (idempotent by URL)
    Add {
        url: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        agency: Option<String>,
        #[arg(long)]
        site: Option<String>,
    },
    /// List monitored pages
    List {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Show a page and its captures
    Show {
        /// Page ID
        id: String,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// Record a capture. The capture is queued for diff computation.
    Add {
        /// Page ID
        page_id: String,
        /// Opaque reference to the stored HTML (URL or path)
        content_ref: String,
        /// Capture timestamp (RFC 3339); defaults to now
        #[arg(long)]
        captured_at: Option<String>,
    },
}

#[derive(Subcommand)]
enum DiffAction {
    /// Drain the snapshot backlog once, computing pending diffs
    Run {
        /// Directory for stored diff payloads
        #[arg(long, default_value = "diff-payloads")]
        payload_dir: PathBuf,
    },
    /// Score pending diffs (drain the diff backlog once)
    Score,
    /// Show a diff and its annotations
    Show {
        /// Diff ID
        id: String,
    },
}

#[derive(Subcommand)]
enum ReviewAction {
    /// Check out the highest-priority unassigned diff
    Checkout {
        /// Reviewer user id
        user: String,
    },
    /// Release the lease held by a user
    Checkin {
        /// Reviewer user id
        user: String,
    },
    /// Record a judgment against a diff
    Annotate {
        /// Reviewer user id
        user: String,
        /// Diff ID
        diff_id: String,
        /// JSON judgment payload
        payload: String,
    },
    /// Show the queue in selection order
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { payload_dir } => cmd_serve(payload_dir).await,
        Command::Db { action } => {
            let db = connect().await?;
            match action {
                DbAction::Migrate => {
                    db.migrate().await?;
                    db.create_queue(SNAPSHOT_BACKLOG).await?;
                    db.create_queue(DIFF_BACKLOG).await?;
                    println!("Migrations applied; backlogs ready.");
                    Ok(())
                }
            }
        }
        Command::Page { action } => {
            let db = connect().await?;
            match action {
                PageAction::Add {
                    url,
                    title,
                    agency,
                    site,
                } => cmd_page_add(&db, url, title, agency, site).await,
                PageAction::List { limit } => cmd_page_list(&db, limit).await,
                PageAction::Show { id } => cmd_page_show(&db, id).await,
            }
        }
        Command::Snapshot { action } => {
            let db = connect().await?;
            match action {
                SnapshotAction::Add {
                    page_id,
                    content_ref,
                    captured_at,
                } => cmd_snapshot_add(&db, page_id, content_ref, captured_at).await,
            }
        }
        Command::Diff { action } => {
            let config = Config::from_env()?;
            let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
            match action {
                DiffAction::Run { payload_dir } => {
                    let differ = Arc::new(HttpDiffer::from_config(&config)?);
                    let store = Arc::new(DiffStore::new(payload_dir));
                    let worker = DiffWorker::new(db, differ, store, WorkerConfig::default());
                    let stats = worker.drain_once().await?;
                    println!(
                        "Diffed {} snapshot(s), skipped {}, {} left for retry.",
                        stats.processed, stats.skipped, stats.failed
                    );
                    Ok(())
                }
                DiffAction::Score => {
                    let worker = ScoreWorker::new(
                        db,
                        Arc::new(ConstantScorer::default()),
                        WorkerConfig::default(),
                    );
                    let stats = worker.drain_once().await?;
                    println!(
                        "Scored {} diff(s), {} left for retry.",
                        stats.processed, stats.failed
                    );
                    Ok(())
                }
                DiffAction::Show { id } => cmd_diff_show(&db, id).await,
            }
        }
        Command::Review { action } => {
            let db = connect().await?;
            match action {
                ReviewAction::Checkout { user } => cmd_review_checkout(&db, user).await,
                ReviewAction::Checkin { user } => cmd_review_checkin(&db, user).await,
                ReviewAction::Annotate {
                    user,
                    diff_id,
                    payload,
                } => cmd_review_annotate(&db, user, diff_id, payload).await,
                ReviewAction::List { limit } => cmd_review_list(&db, limit).await,
            }
        }
    }
}

async fn connect() -> anyhow::Result<Db> {
    let config = Config::from_env()?;
    Ok(Db::connect(config.database_url.expose_secret()).await?)
}

async fn cmd_serve(payload_dir: PathBuf) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "pagewatch".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.migrate().await?;
    db.create_queue(SNAPSHOT_BACKLOG).await?;
    db.create_queue(DIFF_BACKLOG).await?;

    let differ = Arc::new(HttpDiffer::from_config(&config)?);
    let store = Arc::new(DiffStore::new(payload_dir));

    let diff_worker = DiffWorker::new(
        Arc::clone(&db),
        differ,
        store,
        WorkerConfig::default(),
    );
    let score_worker = ScoreWorker::new(
        Arc::clone(&db),
        Arc::new(ConstantScorer::default()),
        WorkerConfig::default(),
    );

    let dw = diff_worker.clone();
    let sw = score_worker.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        dw.shutdown();
        sw.shutdown();
    });

    let diff_task = tokio::spawn({
        let w = diff_worker.clone();
        async move { w.run().await }
    });
    let score_task = tokio::spawn({
        let w = score_worker.clone();
        async move { w.run().await }
    });

    diff_task.await??;
    score_task.await??;
    Ok(())
}

async fn cmd_page_add(
    db: &Db,
    url: String,
    title: Option<String>,
    agency: Option<String>,
    site: Option<String>,
) -> anyhow::Result<()> {
    let result = db
        .get_or_create_page(&url, PageMetadata { title, agency, site })
        .await?;

    match result {
        PageResult::Created(page) => println!("Created: {} ({})", page.id, page.url),
        PageResult::Existing(page) => println!("Already monitored: {} ({})", page.id, page.url),
    }
    Ok(())
}

async fn cmd_page_list(db: &Db, limit: i64) -> anyhow::Result<()> {
    let pages = db.list_pages(limit).await?;

    if pages.is_empty() {
        println!("No monitored pages.");
        return Ok(());
    }

    println!("{:<36}  {:<12}  {:<40}  CREATED", "ID", "AGENCY", "URL");
    println!("{}", "-".repeat(110));
    for page in &pages {
        let url_display: String = page.url.chars().take(40).collect();
        println!(
            "{:<36}  {:<12}  {:<40}  {}",
            page.id,
            page.agency.as_deref().unwrap_or("-"),
            url_display,
            page.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("\n{} page(s)", pages.len());
    Ok(())
}

async fn cmd_page_show(db: &Db, id_str: String) -> anyhow::Result<()> {
    let id: PageId = id_str.parse()?;
    let page = db.get_page(id).await?;
    let snapshots = db.list_snapshots(id).await?;
    let diffs = db.list_diffs(id).await?;

    println!("ID:       {}", page.id);
    println!("URL:      {}", page.url);
    println!("Title:    {}", page.title.as_deref().unwrap_or("-"));
    println!("Agency:   {}", page.agency.as_deref().unwrap_or("-"));
    println!("Site:     {}", page.site.as_deref().unwrap_or("-"));
    println!("Created:  {}", page.created_at);
    println!("---");
    println!("{} snapshot(s):", snapshots.len());
    for snap in &snapshots {
        println!("  {}  captured {}", snap.id, snap.capture_time);
    }
    println!("{} diff(s):", diffs.len());
    for diff in &diffs {
        println!("  {}  {} → {}", diff.id, diff.from_snapshot, diff.to_snapshot);
    }
    Ok(())
}

async fn cmd_snapshot_add(
    db: &Db,
    page_id: String,
    content_ref: String,
    captured_at: Option<String>,
) -> anyhow::Result<()> {
    let page_id: PageId = page_id.parse()?;
    let capture_time = match captured_at {
        Some(ts) => ts.parse::<chrono::DateTime<chrono::Utc>>()?,
        None => chrono::Utc::now(),
    };

    let snapshot = db.insert_snapshot(page_id, capture_time, &content_ref).await?;
    println!(
        "Ingested: {} (page {}, captured {})",
        snapshot.id, snapshot.page_id, snapshot.capture_time
    );
    Ok(())
}

async fn cmd_diff_show(db: &Db, id_str: String) -> anyhow::Result<()> {
    let id: DiffId = id_str.parse()?;
    let diff = db.get_diff(id).await?;
    let priority = db.get_priority(id).await?;
    let annotations = db.list_annotations(id).await?;

    println!("ID:        {}", diff.id);
    println!("From:      {}", diff.from_snapshot);
    println!("To:        {}", diff.to_snapshot);
    println!("Hash:      {}", diff.content_hash);
    println!("Payload:   {}", diff.result_ref);
    println!("Created:   {}", diff.created_at);
    match priority {
        Some(p) => println!("Priority:  {} (assigned {})", p.score, p.assigned_at),
        None => println!("Priority:  not yet assigned"),
    }
    println!("---");
    println!("{} annotation(s):", annotations.len());
    for a in &annotations {
        println!("  [{}] {}: {}", a.created_at, a.user_id, a.payload);
    }
    Ok(())
}

async fn cmd_review_checkout(db: &Db, user: String) -> anyhow::Result<()> {
    match db.checkout_next(&user).await {
        Ok(Some(item)) => {
            println!("Checked out to {user}:");
            println!("  Diff:     {}", item.diff.id);
            println!("  Score:    {}", item.priority.score);
            println!("  Payload:  {}", item.diff.result_ref);
        }
        Ok(None) => println!("Queue is empty — nothing to review."),
        Err(Error::LeaseConflict(_)) => {
            let held = db.current_lease(&user).await?;
            match held {
                Some(lease) => println!(
                    "{user} already holds diff {} (since {}). Check it in first.",
                    lease.diff_id, lease.leased_at
                ),
                None => println!("{user} already holds a lease. Check it in first."),
            }
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn cmd_review_checkin(db: &Db, user: String) -> anyhow::Result<()> {
    match db.checkin(&user).await {
        Ok(diff_id) => println!("Released diff {diff_id}; it is available again."),
        Err(Error::NoActiveLease(_)) => println!("{user} holds no active lease."),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn cmd_review_annotate(
    db: &Db,
    user: String,
    diff_id: String,
    payload: String,
) -> anyhow::Result<()> {
    let diff_id: DiffId = diff_id.parse()?;
    let payload: serde_json::Value = serde_json::from_str(&payload)?;

    let annotation = db.insert_annotation(diff_id, &user, payload).await?;
    println!("Recorded annotation {} on diff {diff_id}.", annotation.id);
    Ok(())
}

async fn cmd_review_list(db: &Db, limit: i64) -> anyhow::Result<()> {
    let entries = db.list_review_queue(limit).await?;

    if entries.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    println!("{:<36}  {:<8}  {:<12}  ASSIGNED", "DIFF", "SCORE", "LEASED BY");
    println!("{}", "-".repeat(80));
    for entry in &entries {
        println!(
            "{:<36}  {:<8}  {:<12}  {}",
            entry.diff_id,
            entry.score,
            entry.leased_by.as_deref().unwrap_or("-"),
            entry.assigned_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("\n{} entry(ies)", entries.len());
    Ok(())
}
