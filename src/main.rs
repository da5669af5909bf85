mod coordinator;
mod db;
mod error;
mod extract;
mod pdf;
mod preview;
mod sensor;
mod settings;
mod source;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use coordinator::{Outcome, DEFAULT_SCAN_INTERVAL_SECS};
use db::Store;
use extract::TargetConfig;
use settings::Settings;

#[derive(Parser)]
#[command(name = "pdf_scrape", about = "Poll PDF documents and expose values scraped from them")]
struct Cli {
    /// Settings file (default: ./pdf_scrape.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a document by URL or local path
    Add {
        /// http(s) URL, file path, or upload:<id>
        locator: String,
        #[arg(short, long)]
        name: Option<String>,
        /// Poll interval in seconds (minimum 30)
        #[arg(short, long, default_value_t = DEFAULT_SCAN_INTERVAL_SECS)]
        interval: u64,
    },
    /// Upload a local PDF and add it as a document
    Upload {
        file: PathBuf,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long, default_value_t = DEFAULT_SCAN_INTERVAL_SECS)]
        interval: u64,
    },
    /// Change a document's source, name or interval, keeping its targets
    Edit {
        document: i64,
        /// New http(s) URL, file path, or upload:<id>
        #[arg(short, long)]
        locator: Option<String>,
        /// New name; an empty string clears it
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Remove a document with its targets and readings
    Remove { document: i64 },
    /// List documents
    List,
    /// Print the cached text of a document's pages
    Pages {
        document: i64,
        /// Page selection, e.g. 2 or 1-3 (default: all)
        #[arg(short, long)]
        pages: Option<String>,
    },
    /// Manage extraction targets
    Target {
        #[command(subcommand)]
        command: TargetCommands,
    },
    /// Show what a target would yield without saving it
    Preview {
        document: i64,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Update documents once
    Refresh {
        /// Only this document (default: all)
        document: Option<i64>,
    },
    /// Poll all documents on their intervals until Ctrl-C
    Run,
    /// Show the latest readings
    Readings {
        document: Option<i64>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show open issues
    Issues,
}

#[derive(Subcommand)]
enum TargetCommands {
    /// Add a target to a document
    Add {
        document: i64,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Change a target; options not given keep their current value
    Edit {
        target: i64,
        #[command(flatten)]
        changes: TargetArgs,
    },
    /// List a document's targets
    List { document: i64 },
    /// Remove a target
    Remove { target: i64 },
}

#[derive(Args)]
struct TargetArgs {
    #[arg(short, long)]
    name: Option<String>,
    /// Page selection: 3, 1-3, 1,4-5 or all (default: 1)
    #[arg(short, long)]
    pages: Option<String>,
    #[arg(short, long)]
    regex: Option<String>,
    /// Match index (negative counts from the end) or "all" (default: 0)
    #[arg(short, long, allow_hyphen_values = true)]
    select: Option<String>,
    #[arg(short, long)]
    template: Option<String>,
    #[arg(long)]
    unit: Option<String>,
    #[arg(long)]
    device_class: Option<String>,
    #[arg(long)]
    state_class: Option<String>,
}

impl TargetArgs {
    fn into_config(self) -> Result<TargetConfig> {
        self.apply(TargetConfig::new("", extract::pages::PageRange::single(1)))
    }

    /// Overlay the given options on `config`. An empty string clears an
    /// optional field.
    fn apply(self, mut config: TargetConfig) -> Result<TargetConfig> {
        let clearable = |v: String| (!v.is_empty()).then_some(v);
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(pages) = self.pages {
            config.pages = pages.parse()?;
        }
        if let Some(select) = self.select {
            config.selection = select.parse()?;
        }
        if let Some(regex) = self.regex {
            config.regex = clearable(regex);
        }
        if let Some(template) = self.template {
            config.value_template = clearable(template);
        }
        if let Some(unit) = self.unit {
            config.unit_of_measurement = clearable(unit);
        }
        if let Some(device_class) = self.device_class {
            config.device_class = clearable(device_class);
        }
        if let Some(state_class) = self.state_class {
            config.state_class = clearable(state_class).as_deref().map(str::parse).transpose()?;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let store = Store::open(&settings.database)?;
    let client = source::client(&settings)?;

    let result = match cli.command {
        Commands::Add { locator, name, interval } => {
            let doc = coordinator::add_document(
                &store,
                &client,
                &settings,
                name.as_deref(),
                &locator,
                interval,
            )
            .await?;
            println!("Added document {}: {}", doc.id, doc.title());
            Ok(())
        }
        Commands::Upload { file, name, interval } => {
            let id = source::store_upload(&settings, &file)?;
            let locator = format!("upload:{}", id);
            let doc = coordinator::add_document(
                &store,
                &client,
                &settings,
                name.as_deref(),
                &locator,
                interval,
            )
            .await?;
            println!("Uploaded {} as document {}: {}", file.display(), doc.id, doc.title());
            Ok(())
        }
        Commands::Edit { document, locator, name, interval } => {
            let edit = coordinator::DocumentEdit {
                name,
                locator,
                scan_interval_secs: interval,
            };
            let doc = coordinator::edit_document(&store, &client, &settings, document, &edit).await?;
            println!("Updated document {}: {} every {}s", doc.id, doc.title(), doc.scan_interval_secs);
            Ok(())
        }
        Commands::Remove { document } => {
            if store.with(|c| db::delete_document(c, document))? {
                println!("Removed document {}.", document);
                Ok(())
            } else {
                Err(anyhow!("No document with id {}", document))
            }
        }
        Commands::List => {
            let docs = store.with(db::fetch_documents)?;
            if docs.is_empty() {
                println!("No documents. Add one with 'add <url|path>'.");
                return Ok(());
            }
            println!("{:>3} | {:<48} | {:>8} | {:<6} | Error", "#", "Document", "Interval", "Status");
            println!("{}", "-".repeat(90));
            for d in &docs {
                println!(
                    "{:>3} | {:<48} | {:>7}s | {:<6} | {}",
                    d.id,
                    truncate(&d.title(), 48),
                    d.scan_interval_secs,
                    d.status,
                    d.last_error.as_deref().map(|e| truncate(e, 40)).unwrap_or_default()
                );
            }
            Ok(())
        }
        Commands::Pages { document, pages } => {
            let state = cached_state(&store, document)?;
            let range: extract::pages::PageRange = match pages {
                Some(p) => p.parse()?,
                None => extract::pages::PageRange::All,
            };
            for i in range.resolve(state.pages.len())? {
                println!("── Page {} ──", i + 1);
                println!("{}", state.pages[i]);
            }
            Ok(())
        }
        Commands::Target { command } => run_target_command(&store, command),
        Commands::Preview { document, target } => {
            let state = cached_state(&store, document)?;
            let regex = target.regex.clone().unwrap_or_default();
            let finished = target.name.is_some() || target.template.is_some();
            let config = target.into_config()?;
            let p = if finished {
                preview::value(&state.pages, &config)?
            } else if !regex.is_empty() {
                preview::regex(&state.pages, &config.pages, &regex)?
            } else {
                preview::page(&state.pages, &config.pages)?
            };
            println!("{}: {}{}", p.name, p.state, unit_suffix(p.unit_of_measurement.as_deref()));
            Ok(())
        }
        Commands::Refresh { document } => {
            let docs = match document {
                Some(id) => vec![store
                    .with(|c| db::fetch_document(c, id))?
                    .ok_or_else(|| anyhow!("No document with id {}", id))?],
                None => store.with(db::fetch_documents)?,
            };
            refresh(&store, &client, &settings, &docs).await
        }
        Commands::Run => {
            let docs = store.with(db::fetch_documents)?;
            if docs.is_empty() {
                println!("No documents to poll.");
                return Ok(());
            }
            coordinator::poll(Arc::new(store), client, Arc::new(settings), docs).await
        }
        Commands::Readings { document, json } => {
            let readings = store.with(|c| db::fetch_readings(c, document))?;
            if json {
                let out: Vec<_> = readings
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "target_id": r.target_id,
                            "name": r.name,
                            "state": r.state,
                            "available": r.is_available(),
                            "attributes": r.attributes(),
                            "updated_at": r.updated_at.to_rfc3339(),
                            "error": r.error,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&out)?);
                return Ok(());
            }
            if readings.is_empty() {
                println!("No readings yet. Run 'refresh' first.");
                return Ok(());
            }
            for r in &readings {
                let state = match &r.state {
                    Some(s) => format!("{}{}", s, unit_suffix(r.unit_of_measurement.as_deref())),
                    None => format!("unavailable ({})", r.error.as_deref().unwrap_or("no data")),
                };
                let modified = r
                    .last_modified
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_else(|| "-".into());
                println!("{:>3} {:<24} {}  [modified {}]", r.target_id, truncate(&r.name, 24), state, modified);
            }
            Ok(())
        }
        Commands::Issues => {
            let issues = store.with(db::fetch_issues)?;
            if issues.is_empty() {
                println!("No open issues.");
                return Ok(());
            }
            for i in &issues {
                let scope = match i.target_id {
                    Some(t) => format!("document {} / target {}", i.document_id, t),
                    None => format!("document {}", i.document_id),
                };
                let hint = match (i.needs_reconfigure, i.target_id) {
                    (false, _) => String::new(),
                    (true, Some(t)) => format!(" (fix with 'target edit {}')", t),
                    (true, None) => format!(" (fix with 'edit {}')", i.document_id),
                };
                println!(
                    "#{} [{}] {}: {}{} (since {})",
                    i.id,
                    i.key,
                    scope,
                    i.message,
                    hint,
                    i.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn run_target_command(store: &Store, command: TargetCommands) -> Result<()> {
    match command {
        TargetCommands::Add { document, target } => {
            let config = target.into_config()?;
            let (id, value) = coordinator::add_target(store, document, &config)?;
            println!(
                "Added target {} ({}): {}{}",
                id,
                config.name,
                sensor::state_of(&value),
                unit_suffix(config.unit_of_measurement.as_deref())
            );
        }
        TargetCommands::Edit { target, changes } => {
            let current = store.with(|c| {
                let Some(document) = db::target_document(c, target)? else {
                    return Ok(None);
                };
                let (targets, _) = db::fetch_targets_checked(c, document)?;
                Ok(Some(targets.into_iter().find(|t| t.id == target).map(|t| t.config)))
            })?;
            let base = match current {
                None => return Err(anyhow!("No target with id {}", target)),
                Some(Some(config)) => config,
                // Unreadable config: rebuild it from the options given.
                Some(None) => TargetConfig::new("", extract::pages::PageRange::single(1)),
            };
            let config = changes.apply(base)?;
            let value = coordinator::edit_target(store, target, &config)?;
            println!(
                "Updated target {} ({}): {}{}",
                target,
                config.name,
                sensor::state_of(&value),
                unit_suffix(config.unit_of_measurement.as_deref())
            );
        }
        TargetCommands::List { document } => {
            let (targets, broken) = store.with(|c| db::fetch_targets_checked(c, document))?;
            for b in &broken {
                println!("{:>3} | {:<20} | unreadable config: {}", b.id, truncate(&b.name, 20), b.error);
            }
            if targets.is_empty() && broken.is_empty() {
                println!("No targets for document {}.", document);
            }
            for t in &targets {
                let c = &t.config;
                println!(
                    "{:>3} | {:<20} | pages {:<6} | regex {:<24} | select {:<4} | template {}",
                    t.id,
                    truncate(&c.name, 20),
                    c.pages.to_string(),
                    truncate(c.regex.as_deref().unwrap_or("-"), 24),
                    c.selection.to_string(),
                    c.value_template.as_deref().map(|s| truncate(s, 30)).unwrap_or_else(|| "-".into()),
                );
            }
        }
        TargetCommands::Remove { target } => {
            if !store.with(|c| db::delete_target(c, target))? {
                return Err(anyhow!("No target with id {}", target));
            }
            println!("Removed target {}.", target);
        }
    }
    Ok(())
}

async fn refresh(
    store: &Store,
    client: &reqwest::Client,
    settings: &Settings,
    docs: &[db::DocumentRow],
) -> Result<()> {
    let pb = ProgressBar::new(docs.len() as u64);
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos}/{len} {msg}")
            .context("Bad progress template")?,
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    let mut lines = Vec::new();
    let mut failed = 0usize;
    for doc in docs {
        pb.set_message(truncate(&doc.title(), 40));
        match coordinator::update(store, client, settings, doc).await? {
            Outcome::Refreshed { refresh, page_count, targets } => {
                lines.push(format!("{} ({:?}, {} pages)", doc.title(), refresh, page_count));
                for t in &targets {
                    match &t.result {
                        Ok(v) => lines.push(format!("  {}: {}", t.name, sensor::state_of(v))),
                        Err(e) => lines.push(format!("  {}: unavailable ({})", t.name, e)),
                    }
                }
            }
            Outcome::Failed(e) => {
                failed += 1;
                lines.push(format!("{}: FAILED [{}] {}", doc.title(), e.issue_key(), e));
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    for line in &lines {
        println!("{}", line);
    }
    println!("Refreshed {} documents ({} failed).", docs.len(), failed);
    Ok(())
}

fn cached_state(store: &Store, document: i64) -> Result<db::DocumentState> {
    store
        .with(|c| db::load_state(c, document))?
        .ok_or_else(|| anyhow!("Document {} has no cached pages. Run 'refresh' first.", document))
}

fn unit_suffix(unit: Option<&str>) -> String {
    unit.map(|u| format!(" {}", u)).unwrap_or_default()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
