use crate::commands::DEFAULT_DB_PATH;
use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use clap::ArgMatches;
use colored::Colorize;
use sitewalk_core::data::{Database, MergePolicy};
use sitewalk_core::ingest::DEFAULT_BATCH_SIZE;
use sitewalk_core::load::{
    LoadOptions, LoadSummary, WalkOptions, execute_load, generate_load_report, resolve_root,
};
use sitewalk_core::report::{
    ReportFormat, gather_recent, generate_recent_report, generate_roots_report, save_report,
};
use sitewalk_scanner::timestamp::parse_timestamp;
use sitewalk_scanner::{HttpFetcher, Traversal, TraversalStats};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{Level, info, warn};
use url::Url;

// Helper functions shared by the handlers

/// Expand `~` in a database path argument
pub fn resolve_db_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

pub fn parse_time_arg(value: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(value).ok_or_else(|| anyhow!("Could not parse '{}' as a date or time", value))
}

/// Open an existing database; a missing file means `init` was never run.
pub fn open_database(path: &Path) -> Result<Database> {
    if !Database::exists(path) {
        bail!(
            "No database at {}, run `sitewalk init` first",
            path.display()
        );
    }
    Database::new(path).with_context(|| format!("Failed to open database {}", path.display()))
}

/// Build walk options from the traversal flags of `load` or `walk`
pub fn walk_options_from_args(args: &ArgMatches, url: String) -> Result<WalkOptions> {
    let mut walk = WalkOptions::new(url);
    walk.follow_patterns = args
        .get_many::<String>("follow")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    walk.leaf_patterns = args
        .get_many::<String>("rule")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    walk.start_from = args
        .get_one::<String>("start-from")
        .map(|value| parse_time_arg(value))
        .transpose()?;
    walk.follow_alternate_links = args.get_flag("alternates");
    Ok(walk)
}

fn db_path_arg(args: &ArgMatches) -> PathBuf {
    resolve_db_path(
        args.get_one::<String>("db")
            .map(String::as_str)
            .unwrap_or(DEFAULT_DB_PATH),
    )
}

fn timeout_arg(args: &ArgMatches) -> Duration {
    Duration::from_secs(*args.get_one::<u64>("timeout").unwrap_or(&30))
}

fn format_arg(args: &ArgMatches) -> Result<ReportFormat> {
    let value = args
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("text");
    ReportFormat::from_str(value).ok_or_else(|| anyhow!("Unknown format '{}'", value))
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

/// Install the stderr log subscriber at the `--log-level` verbosity
pub fn init_logging(level: &str) {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

pub fn handle_init(args: &ArgMatches, quiet: bool) -> Result<()> {
    let db_path = db_path_arg(args);
    let force = args.get_flag("force");

    if !quiet {
        print_divider();
        println!("{}", "  SITEWALK INITIALIZATION".bright_white().bold());
        print_divider();
        println!();
        println!(
            "{} Target: {}",
            "→".blue(),
            db_path.display().to_string().bright_white()
        );
        println!();
    }

    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
    }

    if Database::exists(&db_path) {
        if !force {
            println!("{}", "⚠ WARNING".yellow().bold());
            println!("Database already exists at:");
            println!(
                "  {} {}",
                "•".yellow(),
                db_path.display().to_string().bright_white()
            );
            println!("{} Keeping existing database (use --force to recreate it)", "→".blue());
            return Ok(());
        }

        println!(
            "{} Deleting existing database (force mode)",
            "→".yellow().bold()
        );
        Database::drop(&db_path)
            .with_context(|| format!("Failed to remove {}", db_path.display()))?;
        println!("{} Existing database removed", "✓".green().bold());
    }

    Database::new(&db_path)
        .with_context(|| format!("Failed to create database {}", db_path.display()))?;
    println!(
        "{} Database initialized: {}",
        "✓".green().bold(),
        db_path.display().to_string().bright_white()
    );

    if !quiet {
        println!();
        print_divider();
        println!("{}", "  INITIALIZATION COMPLETE".green().bold());
        print_divider();
    }
    Ok(())
}

pub async fn handle_load(args: &ArgMatches, quiet: bool) -> Result<()> {
    let db = open_database(&db_path_arg(args))?;
    let root = resolve_root(&db, args.get_one::<Url>("url").map(Url::to_string))?;

    let mut options = LoadOptions::new(walk_options_from_args(args, root.clone())?);
    options.batch_size = *args
        .get_one::<usize>("batch-size")
        .unwrap_or(&DEFAULT_BATCH_SIZE);
    if args.get_flag("overwrite") {
        options.merge_policy = MergePolicy::Overwrite;
    }
    options.show_progress_bars = !quiet;
    options.timeout = timeout_arg(args);

    if !quiet {
        println!("\n{} Loading {}", "→".blue(), root.bright_white());
        println!(
            "Merge policy: {}\n",
            match options.merge_policy {
                MergePolicy::KeepExisting => "keep existing",
                MergePolicy::Overwrite => "overwrite",
            }
        );
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, committing what was loaded so far");
            flag.store(true, Ordering::Relaxed);
        }
    });

    // The blocking HTTP client must be built and dropped off the async runtime
    let summary = tokio::task::spawn_blocking(move || -> Result<LoadSummary> {
        let fetcher = HttpFetcher::with_timeout(options.timeout)?;
        Ok(execute_load(&db, options, fetcher, Some(cancel))?)
    })
    .await
    .context("Load task failed")??;

    if summary.report.cancelled {
        println!("\n{} Load cancelled\n", "✗".yellow().bold());
    } else {
        println!("\n{} Load complete!\n", "✓".green().bold());
    }
    print!("{}", generate_load_report(&summary));
    Ok(())
}

fn write_line(out: &mut impl Write, line: &str) -> io::Result<bool> {
    match writeln!(out, "{}", line) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(e) => Err(e),
    }
}

pub async fn handle_walk(args: &ArgMatches) -> Result<()> {
    let url = args
        .get_one::<Url>("url")
        .map(Url::to_string)
        .ok_or_else(|| anyhow!("--url is required"))?;
    let walk = walk_options_from_args(args, url)?;
    let timeout = timeout_arg(args);

    let stats = tokio::task::spawn_blocking(move || -> Result<TraversalStats> {
        let config = walk.traversal_config()?;
        let fetcher = HttpFetcher::with_timeout(timeout)?;
        let mut traversal = Traversal::start(config, fetcher)?;

        let stdout = io::stdout();
        let mut out = stdout.lock();
        for event in traversal.by_ref() {
            // Stop walking once nobody reads the output
            if !write_line(&mut out, &serde_json::to_string(&event)?)? {
                break;
            }
        }
        Ok(traversal.stats().clone())
    })
    .await
    .context("Walk task failed")??;

    info!(
        "Walk finished: {} documents fetched, {} failed, {} events",
        stats.documents_fetched, stats.documents_failed, stats.events_emitted
    );
    Ok(())
}

pub fn handle_roots(args: &ArgMatches) -> Result<()> {
    let db = open_database(&db_path_arg(args))?;
    let format = format_arg(args)?;

    let roots = db.sitemap_roots()?;
    print!("{}", generate_roots_report(&roots, format)?);
    Ok(())
}

pub fn handle_recent(args: &ArgMatches, quiet: bool) -> Result<()> {
    let db = open_database(&db_path_arg(args))?;
    let format = format_arg(args)?;
    let since = args
        .get_one::<String>("since")
        .map(|value| parse_time_arg(value))
        .transpose()?;

    let report = gather_recent(&db, since)?;
    let content = generate_recent_report(&report, format)?;

    match args.get_one::<PathBuf>("output") {
        Some(path) => {
            save_report(&content, path)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            if !quiet {
                println!(
                    "{} Report saved to {}",
                    "✓".green().bold(),
                    path.display().to_string().bright_white()
                );
            }
        }
        None => print!("{}", content),
    }
    Ok(())
}
