use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrapeError};

/// 1-based page selection such as `3`, `1-3`, `1,4-5` or `all`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PageRange {
    All,
    Spans(Vec<(usize, usize)>),
}

impl PageRange {
    pub fn single(page: usize) -> Self {
        PageRange::Spans(vec![(page, page)])
    }

    /// Zero-based page indices in selection order.
    pub fn resolve(&self, count: usize) -> Result<Vec<usize>> {
        match self {
            PageRange::All => Ok((0..count).collect()),
            PageRange::Spans(spans) => {
                let mut out = Vec::new();
                for &(start, end) in spans {
                    if end > count {
                        return Err(ScrapeError::PageOutOfRange { page: end, count });
                    }
                    out.extend(start - 1..end);
                }
                Ok(out)
            }
        }
    }
}

/// Selected pages joined with newlines.
pub fn select_text(pages: &[String], range: &PageRange) -> Result<String> {
    let indices = range.resolve(pages.len())?;
    Ok(indices
        .into_iter()
        .map(|i| pages[i].as_str())
        .collect::<Vec<_>>()
        .join("\n"))
}

impl FromStr for PageRange {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(PageRange::All);
        }
        let invalid = || ScrapeError::InvalidPageRange(s.to_string());
        if s.is_empty() {
            return Err(invalid());
        }

        let mut spans = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            let (start, end) = match part.split_once('-') {
                Some((a, b)) => (
                    a.trim().parse::<usize>().map_err(|_| invalid())?,
                    b.trim().parse::<usize>().map_err(|_| invalid())?,
                ),
                None => {
                    let p = part.parse::<usize>().map_err(|_| invalid())?;
                    (p, p)
                }
            };
            if start == 0 || end < start {
                return Err(invalid());
            }
            spans.push((start, end));
        }
        Ok(PageRange::Spans(spans))
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageRange::All => f.write_str("all"),
            PageRange::Spans(spans) => {
                let parts: Vec<String> = spans
                    .iter()
                    .map(|&(a, b)| if a == b { a.to_string() } else { format!("{}-{}", a, b) })
                    .collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

impl TryFrom<String> for PageRange {
    type Error = ScrapeError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PageRange> for String {
    fn from(r: PageRange) -> String {
        r.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages() -> Vec<String> {
        vec!["one".into(), "two".into(), "three".into(), "four".into()]
    }

    #[test]
    fn parses_forms() {
        assert_eq!("all".parse::<PageRange>().unwrap(), PageRange::All);
        assert_eq!("2".parse::<PageRange>().unwrap(), PageRange::single(2));
        assert_eq!(
            " 1, 3-4 ".parse::<PageRange>().unwrap(),
            PageRange::Spans(vec![(1, 1), (3, 4)])
        );
    }

    #[test]
    fn rejects_bad_ranges() {
        for bad in ["", "0", "3-1", "a", "1-", "1,,2"] {
            assert!(
                matches!(bad.parse::<PageRange>(), Err(ScrapeError::InvalidPageRange(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn joins_selected_pages() {
        let r: PageRange = "1,3-4".parse().unwrap();
        assert_eq!(select_text(&pages(), &r).unwrap(), "one\nthree\nfour");
        assert_eq!(select_text(&pages(), &PageRange::All).unwrap(), "one\ntwo\nthree\nfour");
    }

    #[test]
    fn page_past_end_is_out_of_range() {
        let r: PageRange = "2-5".parse().unwrap();
        let err = select_text(&pages(), &r).unwrap_err();
        assert!(matches!(err, ScrapeError::PageOutOfRange { page: 5, count: 4 }));
    }

    #[test]
    fn display_round_trips_through_serde() {
        let r: PageRange = "1,3-4".parse().unwrap();
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, "\"1,3-4\"");
        assert_eq!(serde_json::from_str::<PageRange>(&json).unwrap(), r);
    }
}
