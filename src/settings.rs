use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::Config;
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "pdf_scrape";
const ENV_PREFIX: &str = "PDF_SCRAPE";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// SQLite file holding documents, parsed pages, targets and readings.
    pub database: PathBuf,
    /// Where uploaded PDFs are kept.
    pub upload_dir: PathBuf,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl Settings {
    /// Defaults, then `pdf_scrape.toml` (or `file`), then `PDF_SCRAPE_*` env vars.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("database", "data/pdf_scrape.sqlite")?
            .set_default("upload_dir", "data/uploads")?
            .set_default("http_timeout_secs", 30)?
            .set_default(
                "user_agent",
                concat!("pdf_scrape/", env!("CARGO_PKG_VERSION")),
            )?;

        builder = match file {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let settings: Settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .context("Failed to load settings")?
            .try_deserialize()
            .context("Invalid settings")?;
        Ok(settings)
    }

    /// Settings rooted in a scratch directory.
    #[cfg(test)]
    pub fn in_dir(dir: &Path) -> Self {
        Settings {
            database: dir.join("pdf_scrape.sqlite"),
            upload_dir: dir.join("uploads"),
            http_timeout_secs: 5,
            user_agent: "pdf_scrape/test".to_string(),
        }
    }
}
