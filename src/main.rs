use clap::Parser;
use job_scout::adapters::FeedAdapter;
use job_scout::config::{CliConfig, Command, ScoutConfig};
use job_scout::core::orchestrator::CycleReport;
use job_scout::domain::ports::{ListingStore, SourceAdapter};
use job_scout::utils::logger;
use job_scout::{CsvBatchStore, Fetcher, LivenessMarker, Orchestrator, ScoutError, TargetSet, TitleFile};
use serde::Serialize;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 Suggestion: {}", e.recovery_suggestion());
            std::process::exit(1);
        }
    };

    // 初始化日誌
    let log_handle = logger::init_logger(&config.logging, cli.verbose)?;
    tracing::debug!("CLI config: {:?}", cli);

    let result = match cli.command.clone() {
        Command::Run { titles, once } => run(&config, titles, once).await,
        Command::Status { json } => status(&config, json).await,
        Command::List {
            limit,
            latest,
            json,
        } => list(&config, limit, latest, json).await,
        Command::Titles { set } => titles(&config, set),
        Command::Prune => prune(&config).await,
    };

    if let Err(e) = &result {
        tracing::error!("❌ {}", e);
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    }
    log_handle.shutdown();

    if let Err(e) = result {
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 Suggestion: {}", e.recovery_suggestion());
        std::process::exit(if e.is_config_error() { 1 } else { 2 });
    }
    Ok(())
}

fn build_store(config: &ScoutConfig) -> CsvBatchStore {
    CsvBatchStore::new(config.jobs_dir()).with_retention(config.retention())
}

fn build_adapters(config: &ScoutConfig) -> job_scout::Result<Vec<Arc<dyn SourceAdapter>>> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    for source in config.sources.iter().filter(|s| s.enabled) {
        // 每個來源各自的 Fetcher，頻率限制互不影響
        let fetcher = Fetcher::with_reqwest(config.fetch_settings())?;
        adapters.push(Arc::new(FeedAdapter::new(source.clone(), fetcher)));
    }
    Ok(adapters)
}

fn resolve_targets(config: &ScoutConfig, titles: Vec<String>) -> job_scout::Result<TargetSet> {
    if !titles.is_empty() {
        return TargetSet::new(titles);
    }
    TitleFile::new(config.titles_path())
        .load()?
        .ok_or_else(|| ScoutError::validation("No job titles given and none saved; use --titles"))
}

async fn run(config: &ScoutConfig, titles: Vec<String>, once: bool) -> job_scout::Result<()> {
    let targets = resolve_targets(config, titles)?;
    let adapters = build_adapters(config)?;
    if adapters.is_empty() {
        tracing::warn!("⚠️ No sources configured; add [[sources]] to the configuration file");
    }

    let marker = LivenessMarker::new(config.pid_path());
    if let Some(pid) = marker.read_pid().filter(|pid| *pid != std::process::id()) {
        tracing::warn!("⚠️ Another run may be active (pid {}); continuing", pid);
    }

    let orchestrator = Orchestrator::new(adapters, build_store(config), config.orchestrator_settings())
        .with_title_file(TitleFile::new(config.titles_path()));

    if once {
        tracing::info!("Running a single cycle for: {}", targets);
        let report = orchestrator.run_once(&targets).await?;
        print_report(&report);
        return Ok(());
    }

    let orchestrator = orchestrator.with_liveness_marker(marker);
    orchestrator.start(targets).await?;
    println!("✅ Scraping started. Press Ctrl-C to stop.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
    }
    orchestrator.stop().await?;

    let status = orchestrator.status();
    println!("⏹️ Stopped after {} cycles", status.cycles_completed);
    Ok(())
}

fn print_report(report: &CycleReport) {
    if report.skipped {
        println!("Cycle skipped (outside active hours)");
        return;
    }
    println!(
        "Collected {} listings, {} matched titles, {} matched location, {} new",
        report.collected, report.title_matched, report.location_matched, report.new_listings
    );
    if !report.failed_sources.is_empty() {
        println!("Failed sources: {}", report.failed_sources.join(", "));
    }
    if let Some(path) = &report.artifact {
        println!("📁 Saved {} listings to {}", report.persisted, path.display());
    }
}

#[derive(Debug, Serialize)]
struct CliStatus {
    active: bool,
    pid: Option<u32>,
    titles: Vec<String>,
    batches: usize,
    latest_batch: Option<String>,
    listings: usize,
}

async fn status(config: &ScoutConfig, json: bool) -> job_scout::Result<()> {
    let marker = LivenessMarker::new(config.pid_path());
    let store = build_store(config);
    let batches = store.list_batches()?;
    let listings = store.load_recent().await?;
    let titles = TitleFile::new(config.titles_path())
        .load()?
        .map(|t| t.titles().to_vec())
        .unwrap_or_default();

    let status = CliStatus {
        active: marker.is_present(),
        pid: marker.read_pid(),
        titles,
        batches: batches.len(),
        latest_batch: batches.last().map(|b| b.collected_at.to_rfc3339()),
        listings: listings.len(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    match status.pid {
        Some(pid) if status.active => println!("Status: Running (pid {})", pid),
        _ => println!("Status: Stopped"),
    }
    println!("Titles: {}", if status.titles.is_empty() { "(none)".to_string() } else { status.titles.join(", ") });
    println!("Batches: {}", status.batches);
    if let Some(latest) = &status.latest_batch {
        println!("Latest batch: {}", latest);
    }
    println!("Listings in window: {}", status.listings);
    Ok(())
}

async fn list(config: &ScoutConfig, limit: Option<usize>, latest: bool, json: bool) -> job_scout::Result<()> {
    let store = build_store(config);
    let mut listings = if latest {
        store.load_latest()?
    } else {
        store.load_recent().await?
    };
    if let Some(limit) = limit {
        listings.truncate(limit);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    for listing in &listings {
        println!(
            "{}  {:<14}  {} @ {}  [{}{}]  {}",
            listing.posted_at.format("%Y-%m-%d %H:%M"),
            listing.source.as_str(),
            listing.title,
            listing.company,
            listing.location.as_deref().unwrap_or("-"),
            if listing.is_remote { ", remote" } else { "" },
            listing.link
        );
    }
    println!("{} listings", listings.len());
    Ok(())
}

fn titles(config: &ScoutConfig, set: Vec<String>) -> job_scout::Result<()> {
    let file = TitleFile::new(config.titles_path());
    if !set.is_empty() {
        let targets = TargetSet::new(set)?;
        file.save(&targets)?;
        println!("✅ Saved {} titles to {}", targets.len(), file.path().display());
        return Ok(());
    }

    match file.load()? {
        Some(targets) => targets.iter().for_each(|t| println!("{}", t)),
        None => println!("(no saved titles)"),
    }
    Ok(())
}

async fn prune(config: &ScoutConfig) -> job_scout::Result<()> {
    let removed = build_store(config).prune(config.retention()).await?;
    println!("🧹 Removed {} old batches", removed);
    Ok(())
}
