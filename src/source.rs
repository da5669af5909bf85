use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, ScrapeError};
use crate::settings::Settings;

const UPLOAD_PREFIX: &str = "upload:";

/// Where a document's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Http { url: String },
    File { path: PathBuf },
    /// A file previously handed to [`store_upload`].
    Upload { id: String },
}

/// What the source reported about the bytes' freshness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

#[derive(Debug)]
pub enum Fetched {
    Modified { bytes: Vec<u8>, signal: Signal },
    /// HTTP 304 against the previous validators; `signal` holds any fresh
    /// validators the server sent with it.
    NotModified { signal: Signal },
}

impl Source {
    /// `http(s)://…` is a URL, `upload:<id>` an uploaded file, anything else a path.
    pub fn parse_locator(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ScrapeError::InvalidSource("empty locator".to_string()));
        }
        if let Some(id) = s.strip_prefix(UPLOAD_PREFIX) {
            return Source::from_parts("upload", id);
        }
        let lower = s.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Source::from_parts("http", s);
        }
        Source::from_parts("file", s)
    }

    pub fn from_parts(kind: &str, locator: &str) -> Result<Self> {
        match kind {
            "http" => {
                let url = Url::parse(locator)
                    .map_err(|e| ScrapeError::InvalidSource(format!("{}: {}", locator, e)))?;
                if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
                    return Err(ScrapeError::InvalidSource(format!("not an http url: {}", locator)));
                }
                Ok(Source::Http { url: url.to_string() })
            }
            "file" => Ok(Source::File { path: PathBuf::from(locator) }),
            "upload" => {
                if locator.is_empty() || !locator.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(ScrapeError::InvalidSource(format!("bad upload id: {}", locator)));
                }
                Ok(Source::Upload { id: locator.to_string() })
            }
            other => Err(ScrapeError::InvalidSource(format!("unknown source kind: {}", other))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Source::Http { .. } => "http",
            Source::File { .. } => "file",
            Source::Upload { .. } => "upload",
        }
    }

    pub fn locator(&self) -> String {
        match self {
            Source::Http { url } => url.clone(),
            Source::File { path } => path.display().to_string(),
            Source::Upload { id } => id.clone(),
        }
    }

    pub async fn fetch(
        &self,
        client: &reqwest::Client,
        settings: &Settings,
        previous: Option<&Signal>,
    ) -> Result<Fetched> {
        match self {
            Source::Http { url } => fetch_http(client, url, previous).await,
            Source::File { path } => read_file(path).await,
            Source::Upload { id } => read_file(&upload_path(settings, id)).await,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Upload { id } => write!(f, "{}{}", UPLOAD_PREFIX, id),
            other => f.write_str(&other.locator()),
        }
    }
}

pub fn client(settings: &Settings) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.http_timeout_secs))
        .user_agent(settings.user_agent.clone())
        .build()?)
}

async fn fetch_http(client: &reqwest::Client, url: &str, previous: Option<&Signal>) -> Result<Fetched> {
    let mut req = client.get(url);
    if let Some(prev) = previous {
        if let Some(etag) = &prev.etag {
            req = req.header(IF_NONE_MATCH, etag.as_str());
        }
        if let Some(modified) = prev.modified {
            req = req.header(IF_MODIFIED_SINCE, http_date(modified));
        }
    }

    let resp = req.send().await?;
    let status = resp.status();
    let header = |name| {
        resp.headers()
            .get(name)
            .and_then(|v: &reqwest::header::HeaderValue| v.to_str().ok())
            .map(str::to_string)
    };
    let signal = Signal {
        modified: header(LAST_MODIFIED).and_then(|v| parse_http_date(&v)),
        etag: header(ETAG),
    };

    if status == StatusCode::NOT_MODIFIED {
        debug!("{} not modified", url);
        return Ok(Fetched::NotModified { signal });
    }
    if !status.is_success() {
        return Err(ScrapeError::Http {
            url: url.to_string(),
            message: format!("HTTP status {}", status),
        });
    }

    let bytes = resp.bytes().await?.to_vec();
    info!("Fetched {} ({} bytes)", url, bytes.len());
    Ok(Fetched::Modified { bytes, signal })
}

async fn read_file(path: &Path) -> Result<Fetched> {
    let shown = path.display().to_string();
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| ScrapeError::io(&shown, e))?;
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ScrapeError::io(&shown, e))?;
    let signal = Signal {
        modified: meta.modified().ok().map(DateTime::<Utc>::from),
        etag: None,
    };
    debug!("Read {} ({} bytes)", shown, bytes.len());
    Ok(Fetched::Modified { bytes, signal })
}

fn http_date(dt: DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

pub fn upload_path(settings: &Settings, id: &str) -> PathBuf {
    settings.upload_dir.join(format!("{}.pdf", id))
}

/// Copy a user-supplied PDF into the upload directory and return its id.
///
/// The id is derived from the content, so uploading the same file twice
/// yields the same id.
pub fn store_upload(settings: &Settings, path: &Path) -> Result<String> {
    let shown = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|e| ScrapeError::io(&shown, e))?;
    if !bytes.starts_with(b"%PDF-") {
        return Err(ScrapeError::PdfParse(format!("{} is not a pdf", shown)));
    }

    let id = crate::pdf::checksum(&bytes)[..16].to_string();
    let dir = settings.upload_dir.display().to_string();
    std::fs::create_dir_all(&settings.upload_dir).map_err(|e| ScrapeError::io(&dir, e))?;
    let dest = upload_path(settings, &id);
    std::fs::write(&dest, &bytes).map_err(|e| ScrapeError::io(dest.display().to_string(), e))?;
    info!("Stored upload {} from {}", id, shown);
    Ok(id)
}

/// A one-connection-at-a-time HTTP stub for tests.
#[cfg(test)]
pub mod fixtures {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `body` with an ETag and answers 304 when it is echoed back.
    pub async fn serve(body: Vec<u8>, requests: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for _ in 0..requests {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 4096];
                let n = sock.read(&mut buf).await.unwrap();
                let req = String::from_utf8_lossy(&buf[..n]).to_ascii_lowercase();
                let head = if req.contains("if-none-match: \"v1\"") {
                    "HTTP/1.1 304 Not Modified\r\nETag: \"v1\"\r\nLast-Modified: Thu, 22 Oct 2015 07:28:00 GMT\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                } else if req.starts_with("get /missing") {
                    "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                } else {
                    format!(
                        "HTTP/1.1 200 OK\r\nETag: \"v1\"\r\nLast-Modified: Wed, 21 Oct 2015 07:28:00 GMT\r\nContent-Type: application/pdf\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    )
                };
                sock.write_all(head.as_bytes()).await.unwrap();
                if head.starts_with("HTTP/1.1 200") {
                    sock.write_all(&body).await.unwrap();
                }
                sock.shutdown().await.ok();
            }
        });
        format!("http://{}", addr)
    }
}
