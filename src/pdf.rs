use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use lopdf::Document;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Result, ScrapeError};

/// Text of every page plus what is needed to tell whether it changed.
#[derive(Debug, Clone)]
pub struct ParsedPdf {
    pub pages: Vec<String>,
    pub checksum: String,
    /// `ModDate` from the document information dictionary.
    pub modified: Option<DateTime<FixedOffset>>,
}

pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn parse(bytes: &[u8]) -> Result<ParsedPdf> {
    if !bytes.starts_with(b"%PDF-") {
        return Err(ScrapeError::PdfParse("missing %PDF- header".to_string()));
    }

    let pages = extract_pages(bytes)?;
    if pages.is_empty() {
        return Err(ScrapeError::PdfParse("document has no pages".to_string()));
    }

    let modified = modification_date(bytes);
    debug!(pages = pages.len(), ?modified, "Parsed pdf");

    Ok(ParsedPdf {
        pages,
        checksum: checksum(bytes),
        modified,
    })
}

// pdf-extract panics on some malformed input instead of returning an error.
fn extract_pages(bytes: &[u8]) -> Result<Vec<String>> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }));
    match result {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(ScrapeError::PdfParse(e.to_string())),
        Err(_) => Err(ScrapeError::PdfParse(
            "text extraction panicked (malformed document)".to_string(),
        )),
    }
}

fn modification_date(bytes: &[u8]) -> Option<DateTime<FixedOffset>> {
    let doc = Document::load_mem(bytes).ok()?;
    let info = doc.trailer.get(b"Info").ok()?;
    let info = match info.as_reference() {
        Ok(id) => doc.get_object(id).ok()?,
        Err(_) => info,
    };
    let raw = info.as_dict().ok()?.get(b"ModDate").ok()?.as_str().ok()?;
    parse_pdf_date(&String::from_utf8_lossy(raw))
}

/// Parse a PDF date string: `D:YYYYMMDDHHmmSSOHH'mm'`.
///
/// Everything after the year is optional. A missing offset or `Z` is UTC.
pub fn parse_pdf_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let s = raw.trim();
    let s = s.strip_prefix("D:").unwrap_or(s);

    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return None;
    }
    let field = |start: usize, len: usize, default: u32| -> Option<u32> {
        match digits.get(start..start + len) {
            Some(v) => v.parse().ok(),
            None => Some(default),
        }
    };

    let year: i32 = digits[..4].parse().ok()?;
    let month = field(4, 2, 1)?;
    let day = field(6, 2, 1)?;
    let hour = field(8, 2, 0)?;
    let minute = field(10, 2, 0)?;
    let second = field(12, 2, 0)?;

    let rest = &s[digits.len()..];
    let offset_secs = match rest.chars().next() {
        Some(sign @ ('+' | '-')) => {
            let parts: Vec<&str> = rest[1..]
                .split('\'')
                .filter(|p| !p.is_empty())
                .collect();
            let hh: i32 = parts.first().and_then(|p| p.parse().ok()).unwrap_or(0);
            let mm: i32 = parts.get(1).and_then(|p| p.parse().ok()).unwrap_or(0);
            if !(0..=23).contains(&hh) || !(0..=59).contains(&mm) {
                return None;
            }
            let secs = hh * 3600 + mm * 60;
            if sign == '-' {
                -secs
            } else {
                secs
            }
        }
        _ => 0,
    };

    let offset = FixedOffset::east_opt(offset_secs)?;
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    offset.from_local_datetime(&naive).single()
}


#[cfg(test)]
mod tests {
    use super::fixtures::pdf_with_pages;
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn pages_come_back_in_order() {
        let bytes = pdf_with_pages(&["Water level 12.5 m", "Gate status OPEN"], None);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.pages.len(), 2);
        assert!(parsed.pages[0].contains("Water level 12.5 m"));
        assert!(parsed.pages[1].contains("Gate status OPEN"));
        assert!(parsed.modified.is_none());
    }

    #[test]
    fn checksum_follows_bytes() {
        let a = pdf_with_pages(&["Alpha"], None);
        let b = pdf_with_pages(&["Beta"], None);
        assert_eq!(parse(&a).unwrap().checksum, checksum(&a));
        assert_ne!(checksum(&a), checksum(&b));
        assert_eq!(checksum(&a).len(), 64);
    }

    #[test]
    fn reads_mod_date_from_info() {
        let bytes = pdf_with_pages(&["Menu"], Some("D:20240115103000+01'00'"));
        let modified = parse(&bytes).unwrap().modified.unwrap();
        assert_eq!(modified.to_rfc3339(), "2024-01-15T10:30:00+01:00");
    }

    #[test]
    fn rejects_non_pdf_bytes() {
        let err = parse(b"<html>not a pdf</html>").unwrap_err();
        assert!(matches!(err, ScrapeError::PdfParse(_)));
    }

    #[test]
    fn rejects_truncated_pdf() {
        let bytes = pdf_with_pages(&["Alpha"], None);
        let err = parse(&bytes[..bytes.len() / 3]).unwrap_err();
        assert!(matches!(err, ScrapeError::PdfParse(_)));
    }

    #[test]
    fn pdf_dates() {
        let d = parse_pdf_date("D:20231231235959Z").unwrap();
        assert_eq!(d.offset().local_minus_utc(), 0);
        assert_eq!((d.year(), d.month(), d.day()), (2023, 12, 31));
        assert_eq!((d.hour(), d.minute(), d.second()), (23, 59, 59));

        let d = parse_pdf_date("D:20230601083000-05'30'").unwrap();
        assert_eq!(d.offset().local_minus_utc(), -(5 * 3600 + 30 * 60));

        let d = parse_pdf_date("2022").unwrap();
        assert_eq!((d.month(), d.day(), d.hour()), (1, 1, 0));

        assert!(parse_pdf_date("D:20231341").is_none());
        assert!(parse_pdf_date("garbage").is_none());
    }

    #[test]
    fn out_of_range_offsets_are_ignored() {
        assert!(parse_pdf_date("D:20240101000000+2147483647'00'").is_none());
        assert!(parse_pdf_date("D:20240101000000-05'75'").is_none());
        assert!(parse_pdf_date("D:20240101000000+24'00'").is_none());

        let bytes = pdf_with_pages(&["Level 1"], Some("D:20240101000000+2147483647'00'"));
        let parsed = parse(&bytes).unwrap();
        assert!(parsed.pages[0].contains("Level 1"));
        assert!(parsed.modified.is_none());
    }
}
