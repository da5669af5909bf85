use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, FixedOffset, Utc};
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::db::{self, DocumentRow, DocumentState, Store};
use crate::error::ScrapeError;
use crate::extract::pages::PageRange;
use crate::extract::{self, TargetConfig, Value};
use crate::pdf;
use crate::sensor::{self, Reading};
use crate::settings::Settings;
use crate::source::{Fetched, Source};

pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;
pub const MIN_SCAN_INTERVAL_SECS: u64 = 30;

/// How the pages used by an update were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Bytes were new; the PDF was parsed.
    Reparsed,
    /// Same checksum and modification time; cached pages reused.
    Unchanged,
    /// The server answered 304; cached pages reused.
    NotModified,
}

#[derive(Debug)]
pub struct TargetResult {
    pub target_id: i64,
    pub name: String,
    pub result: std::result::Result<Value, ScrapeError>,
}

#[derive(Debug)]
pub enum Outcome {
    Refreshed {
        refresh: Refresh,
        page_count: usize,
        targets: Vec<TargetResult>,
    },
    /// Fetching or parsing failed; every target of the document is unavailable.
    Failed(ScrapeError),
}

pub fn check_interval(secs: u64) -> std::result::Result<(), ScrapeError> {
    if secs < MIN_SCAN_INTERVAL_SECS {
        return Err(ScrapeError::IntervalTooShort(secs));
    }
    Ok(())
}

/// Fetch the source and return its pages, reparsing only when needed.
async fn load_pages(
    client: &reqwest::Client,
    settings: &Settings,
    source: &Source,
    previous: Option<DocumentState>,
) -> std::result::Result<(DocumentState, Refresh), ScrapeError> {
    let now = Utc::now();
    let fetched = source
        .fetch(client, settings, previous.as_ref().map(|p| &p.signal))
        .await?;

    let (bytes, signal) = match fetched {
        Fetched::NotModified { signal } => {
            let mut state = previous.ok_or_else(|| {
                ScrapeError::InvalidSource(format!("{} answered 304 without a cached copy", source))
            })?;
            if signal.etag.is_some() {
                state.signal.etag = signal.etag;
            }
            if signal.modified.is_some() {
                state.signal.modified = signal.modified;
            }
            state.fetched_at = now;
            return Ok((state, Refresh::NotModified));
        }
        Fetched::Modified { bytes, signal } => (bytes, signal),
    };

    let checksum = pdf::checksum(&bytes);
    if let Some(mut state) = previous {
        if state.checksum == checksum && state.signal.modified == signal.modified {
            state.signal = signal;
            state.fetched_at = now;
            return Ok((state, Refresh::Unchanged));
        }
    }

    let parsed = tokio::task::spawn_blocking(move || pdf::parse(&bytes))
        .await
        .map_err(|e| ScrapeError::PdfParse(format!("parser task failed: {}", e)))??;
    info!(
        source = %source,
        pages = parsed.pages.len(),
        "Parsed {}",
        &parsed.checksum[..12]
    );

    Ok((
        DocumentState {
            checksum: parsed.checksum,
            pdf_modified: parsed.modified,
            signal,
            pages: parsed.pages,
            fetched_at: now,
            parsed_at: now,
        },
        Refresh::Reparsed,
    ))
}

/// One poll of a document: fetch, compare, parse if changed, run every target.
///
/// Document-level failures are recorded and returned as [`Outcome::Failed`];
/// only store failures are errors.
pub async fn update(
    store: &Store,
    client: &reqwest::Client,
    settings: &Settings,
    doc: &DocumentRow,
) -> Result<Outcome> {
    let previous = store.with(|c| db::load_state(c, doc.id))?;

    let (state, refresh) = match load_pages(client, settings, &doc.source, previous).await {
        Ok(loaded) => loaded,
        Err(err) => {
            warn!("Update of {} failed: {}", doc.title(), err);
            record_failure(store, doc, &err)?;
            return Ok(Outcome::Failed(err));
        }
    };

    store.with(|c| {
        match refresh {
            Refresh::Reparsed => db::save_state(c, doc.id, &state)?,
            Refresh::Unchanged | Refresh::NotModified => {
                db::touch_state(c, doc.id, &state.signal, state.fetched_at)?
            }
        }
        db::set_document_status(c, doc.id, None)?;
        db::clear_issues(c, doc.id, None)?;
        Ok(())
    })?;
    debug!("{}: {:?}, {} pages", doc.title(), refresh, state.pages.len());

    let (targets, broken) = store.with(|c| db::fetch_targets_checked(c, doc.id))?;
    let last_modified = state.last_modified();
    let mut results = Vec::with_capacity(targets.len() + broken.len());

    for target in broken {
        let err = ScrapeError::InvalidConfig(format!("unreadable target config: {}", target.error));
        let placeholder = TargetConfig::new(target.name.clone(), PageRange::All);
        let reading = reading_for(target.id, &placeholder, Err(err.to_string()), None);
        store.with(|c| {
            db::save_reading(c, &reading)?;
            db::clear_issues(c, doc.id, Some(target.id))?;
            db::raise_issue(
                c,
                doc.id,
                Some(target.id),
                err.issue_key(),
                &format!("{} for configuration {}", err, target.name),
                true,
            )?;
            Ok(())
        })?;
        results.push(TargetResult {
            target_id: target.id,
            name: target.name,
            result: Err(err),
        });
    }

    for target in targets {
        let result = extract::run_target(&state.pages, &target.config);
        let reading = reading_for(
            target.id,
            &target.config,
            result.as_ref().map_err(|e| e.to_string()),
            last_modified,
        );
        store.with(|c| {
            db::save_reading(c, &reading)?;
            db::clear_issues(c, doc.id, Some(target.id))?;
            if let Err(err) = &result {
                db::raise_issue(
                    c,
                    doc.id,
                    Some(target.id),
                    err.issue_key(),
                    &format!("{} for configuration {}", err, target.config.name),
                    false,
                )?;
            }
            Ok(())
        })?;
        if let Err(err) = &result {
            warn!("{}: {} for configuration {}", doc.title(), err, target.config.name);
        }
        results.push(TargetResult {
            target_id: target.id,
            name: target.config.name,
            result,
        });
    }

    Ok(Outcome::Refreshed {
        refresh,
        page_count: state.pages.len(),
        targets: results,
    })
}

fn reading_for(
    target_id: i64,
    config: &TargetConfig,
    result: std::result::Result<&Value, String>,
    last_modified: Option<DateTime<FixedOffset>>,
) -> Reading {
    let (state, value, error) = match result {
        Ok(value) => (Some(sensor::state_of(value)), Some(value.clone()), None),
        Err(message) => (None, None, Some(message)),
    };
    Reading {
        target_id,
        name: config.name.clone(),
        state,
        value,
        last_modified,
        unit_of_measurement: config.unit_of_measurement.clone(),
        device_class: config.device_class.clone(),
        state_class: config.state_class,
        updated_at: Utc::now(),
        error,
    }
}

fn record_failure(store: &Store, doc: &DocumentRow, err: &ScrapeError) -> Result<()> {
    let message = err.to_string();
    store.with(|c| {
        db::set_document_status(c, doc.id, Some(&message))?;
        db::clear_issues(c, doc.id, None)?;
        db::raise_issue(c, doc.id, None, err.issue_key(), &message, err.needs_reconfigure())?;
        let (targets, broken) = db::fetch_targets_checked(c, doc.id)?;
        for target in targets {
            let reading = reading_for(target.id, &target.config, Err(message.clone()), None);
            db::save_reading(c, &reading)?;
        }
        for target in broken {
            let placeholder = TargetConfig::new(target.name, PageRange::All);
            db::save_reading(c, &reading_for(target.id, &placeholder, Err(message.clone()), None))?;
        }
        Ok(())
    })
}

/// Validate a new document the way initial setup does and store it.
///
/// The source must be reachable and parse as a PDF before anything is saved.
pub async fn add_document(
    store: &Store,
    client: &reqwest::Client,
    settings: &Settings,
    name: Option<&str>,
    locator: &str,
    scan_interval_secs: u64,
) -> Result<DocumentRow> {
    check_interval(scan_interval_secs)?;
    let source = Source::parse_locator(locator)?;

    let exists = store.with(|c| Ok(db::fetch_documents(c)?.iter().any(|d| d.source == source)))?;
    if exists {
        return Err(ScrapeError::AlreadyConfigured(source.to_string()).into());
    }

    let (state, _) = load_pages(client, settings, &source, None).await?;

    store.with(|c| {
        let id = db::insert_document(c, name, &source, scan_interval_secs)?
            .ok_or_else(|| ScrapeError::AlreadyConfigured(source.to_string()))?;
        db::save_state(c, id, &state)?;
        db::set_document_status(c, id, None)?;
        let doc = db::fetch_document(c, id)?.ok_or_else(|| anyhow!("Document {} vanished", id))?;
        info!("Added {} ({} pages)", doc.title(), state.pages.len());
        Ok(doc)
    })
}

/// Validate a target against the document's cached pages and store it.
///
/// Returns the new target id and the value it currently yields.
pub fn add_target(store: &Store, document_id: i64, config: &TargetConfig) -> Result<(i64, Value)> {
    config.validate()?;
    store.with(|c| {
        let doc = db::fetch_document(c, document_id)?
            .ok_or_else(|| anyhow!("No document with id {}", document_id))?;
        let state = db::load_state(c, document_id)?
            .ok_or_else(|| anyhow!("{} has not been fetched yet", doc.title()))?;
        let value = extract::run_target(&state.pages, config)?;
        let id = db::insert_target(c, document_id, config)?.ok_or_else(|| {
            ScrapeError::InvalidConfig(format!("target name already used: {}", config.name))
        })?;
        info!("Added target {} to {}", config.name, doc.title());
        Ok((id, value))
    })
}

/// Changes to an existing document; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct DocumentEdit {
    /// `Some("")` clears the name.
    pub name: Option<String>,
    pub locator: Option<String>,
    pub scan_interval_secs: Option<u64>,
}

/// Reconfigure a document with the same checks as [`add_document`].
///
/// Targets and readings are kept. The source is fetched and parsed again, and
/// the document's own issues are cleared on success.
pub async fn edit_document(
    store: &Store,
    client: &reqwest::Client,
    settings: &Settings,
    id: i64,
    edit: &DocumentEdit,
) -> Result<DocumentRow> {
    let doc = store
        .with(|c| db::fetch_document(c, id))?
        .ok_or_else(|| anyhow!("No document with id {}", id))?;
    let interval = edit.scan_interval_secs.unwrap_or(doc.scan_interval_secs);
    check_interval(interval)?;
    let source = match &edit.locator {
        Some(locator) => Source::parse_locator(locator)?,
        None => doc.source.clone(),
    };
    let name = match &edit.name {
        Some(n) if n.trim().is_empty() => None,
        Some(n) => Some(n.clone()),
        None => doc.name.clone(),
    };

    let (state, _) = load_pages(client, settings, &source, None).await?;

    store.with(|c| {
        db::update_document(c, id, name.as_deref(), &source, interval)?
            .ok_or_else(|| ScrapeError::AlreadyConfigured(source.to_string()))?;
        db::save_state(c, id, &state)?;
        db::set_document_status(c, id, None)?;
        db::clear_issues(c, id, None)?;
        let doc = db::fetch_document(c, id)?.ok_or_else(|| anyhow!("Document {} vanished", id))?;
        info!("Reconfigured {} ({} pages)", doc.title(), state.pages.len());
        Ok(doc)
    })
}

/// Replace a target's config with the same checks as [`add_target`].
///
/// The target keeps its id; its reading is refreshed and its issues cleared.
pub fn edit_target(store: &Store, target_id: i64, config: &TargetConfig) -> Result<Value> {
    config.validate()?;
    store.with(|c| {
        let document_id = db::target_document(c, target_id)?
            .ok_or_else(|| anyhow!("No target with id {}", target_id))?;
        let state = db::load_state(c, document_id)?
            .ok_or_else(|| anyhow!("Document {} has not been fetched yet", document_id))?;
        let value = extract::run_target(&state.pages, config)?;
        db::update_target(c, target_id, config)?.ok_or_else(|| {
            ScrapeError::InvalidConfig(format!("target name already used: {}", config.name))
        })?;
        let reading = reading_for(target_id, config, Ok(&value), state.last_modified());
        db::save_reading(c, &reading)?;
        db::clear_issues(c, document_id, Some(target_id))?;
        info!("Reconfigured target {} ({})", target_id, config.name);
        Ok(value)
    })
}

/// Poll every document on its own interval until Ctrl-C.
pub async fn poll(
    store: Arc<Store>,
    client: reqwest::Client,
    settings: Arc<Settings>,
    documents: Vec<DocumentRow>,
) -> Result<()> {
    let mut tasks = JoinSet::new();
    for doc in documents {
        let store = Arc::clone(&store);
        let client = client.clone();
        let settings = Arc::clone(&settings);
        tasks.spawn(async move { poll_document(&store, &client, &settings, doc).await });
    }
    info!("Polling {} documents", tasks.len());

    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        _ = async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    if !e.is_cancelled() {
                        warn!("Polling task panicked: {}", e);
                    }
                }
            }
        } => false,
    };
    if interrupted {
        info!("Stopping");
        tasks.abort_all();
    }
    Ok(())
}

/// Poll one document until it is removed. Errors are logged and the next tick
/// tries again.
async fn poll_document(store: &Store, client: &reqwest::Client, settings: &Settings, doc: DocumentRow) {
    let id = doc.id;
    let mut period = doc.scan_interval_secs;
    let mut ticker = new_ticker(period, Instant::now());

    loop {
        ticker.tick().await;
        // Re-read so removals and reconfigurations are picked up.
        let doc = match store.with(|c| db::fetch_document(c, id)) {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                info!("Document {} removed, stopping its poller", id);
                return;
            }
            Err(e) => {
                warn!("Poll of document {} failed: {:#}", id, e);
                continue;
            }
        };
        if doc.scan_interval_secs != period {
            period = doc.scan_interval_secs;
            ticker = new_ticker(period, Instant::now() + Duration::from_secs(period));
        }
        match update(store, client, settings, &doc).await {
            Ok(Outcome::Refreshed { refresh, targets, .. }) => {
                let failed = targets.iter().filter(|t| t.result.is_err()).count();
                info!(
                    "{}: {:?}, {} targets ({} failed)",
                    doc.title(),
                    refresh,
                    targets.len(),
                    failed
                );
            }
            Ok(Outcome::Failed(_)) => {}
            Err(e) => warn!("Poll of {} failed: {:#}", doc.title(), e),
        }
    }
}

fn new_ticker(period_secs: u64, start: Instant) -> Interval {
    let mut ticker = tokio::time::interval_at(start, Duration::from_secs(period_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
