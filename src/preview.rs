//! Previews shown while a target is being configured.
//!
//! Each step of target setup gets a throwaway sensor-like state so the user
//! can see what the page, the pattern, or the template currently yields.

use serde::Serialize;

use crate::error::{Result, ScrapeError};
use crate::extract::{self, matches, pages, TargetConfig};

const PREVIEW_MAX_LEN: usize = 255;
const PREVIEW_SUFFIX: &str = " ***truncated***";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub name: String,
    pub state: String,
    pub unit_of_measurement: Option<String>,
}

impl Preview {
    fn new(name: impl Into<String>, state: &str) -> Self {
        Preview {
            name: name.into(),
            state: truncate(state),
            unit_of_measurement: None,
        }
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() < PREVIEW_MAX_LEN {
        s.to_string()
    } else {
        let kept: String = s.chars().take(PREVIEW_MAX_LEN).collect();
        format!("{}{}", kept, PREVIEW_SUFFIX)
    }
}

/// Page step: the raw text of the selected pages.
pub fn page(doc_pages: &[String], range: &pages::PageRange) -> Result<Preview> {
    let text = pages::select_text(doc_pages, range)?;
    Ok(Preview::new("Page Text", &text))
}

/// Regex step: every match, numbered from 1.
///
/// No match is not an error here; the preview says so instead.
pub fn regex(doc_pages: &[String], range: &pages::PageRange, pattern: &str) -> Result<Preview> {
    let text = pages::select_text(doc_pages, range)?;
    if pattern.is_empty() {
        return Ok(Preview::new("Page Text", &text));
    }
    let re = matches::compile(pattern)?;
    let found = matches::find_all(&re, &text);
    if found.is_empty() {
        return Ok(Preview::new("?", "No matches found."));
    }
    let listed: Vec<String> = found
        .iter()
        .enumerate()
        .map(|(i, m)| format!("{{{}: {}}}", i + 1, m))
        .collect();
    Ok(Preview::new(format!("{} Matches", found.len()), &listed.join(", ")))
}

/// Final step: the whole pipeline with the candidate settings.
pub fn value(doc_pages: &[String], target: &TargetConfig) -> Result<Preview> {
    if target.name.trim().is_empty() {
        return Err(ScrapeError::InvalidConfig("name is required".to_string()));
    }
    let v = extract::run_target(doc_pages, target)?;
    let mut preview = Preview::new(target.name.clone(), &crate::sensor::state_of(&v));
    preview.unit_of_measurement = target.unit_of_measurement.clone();
    Ok(preview)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::pages::PageRange;

    fn doc() -> Vec<String> {
        vec![
            "Bin collection\nPaper: 12 March\nGlass: 19 March".to_string(),
            "Garden: 26 March".to_string(),
        ]
    }

    #[test]
    fn page_preview_shows_text() {
        let p = page(&doc(), &PageRange::single(2)).unwrap();
        assert_eq!(p.name, "Page Text");
        assert_eq!(p.state, "Garden: 26 March");
    }

    #[test]
    fn regex_preview_lists_matches() {
        let p = regex(&doc(), &PageRange::All, r"(\d+) March").unwrap();
        assert_eq!(p.name, "3 Matches");
        assert_eq!(p.state, "{1: 12}, {2: 19}, {3: 26}");
    }

    #[test]
    fn regex_preview_without_matches() {
        let p = regex(&doc(), &PageRange::single(1), "April").unwrap();
        assert_eq!(p.name, "?");
        assert_eq!(p.state, "No matches found.");
    }

    #[test]
    fn regex_preview_rejects_bad_pattern() {
        assert!(matches!(
            regex(&doc(), &PageRange::All, "(["),
            Err(ScrapeError::Pattern { .. })
        ));
    }

    #[test]
    fn empty_pattern_previews_the_page() {
        let p = regex(&doc(), &PageRange::single(2), "").unwrap();
        assert_eq!(p.state, "Garden: 26 March");
    }

    #[test]
    fn value_preview_runs_the_template() {
        let mut t = TargetConfig::new("Glass", PageRange::single(1));
        t.regex = Some(r"Glass: (\d+ \w+)".into());
        t.value_template = Some("{{ value | upper }}".into());
        t.unit_of_measurement = Some("date".into());
        let p = value(&doc(), &t).unwrap();
        assert_eq!(p.name, "Glass");
        assert_eq!(p.state, "19 MARCH");
        assert_eq!(p.unit_of_measurement.as_deref(), Some("date"));

        t.name = String::new();
        assert!(value(&doc(), &t).is_err());
    }

    #[test]
    fn long_previews_are_marked() {
        let long = vec!["z".repeat(400)];
        let p = page(&long, &PageRange::All).unwrap();
        assert!(p.state.ends_with(" ***truncated***"));
        assert_eq!(p.state.len(), 255 + " ***truncated***".len());
    }
}
