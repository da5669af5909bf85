use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrapeError};

/// One regex hit. With several capture groups every group is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match {
    Text(String),
    Groups(Vec<String>),
}

impl Match {
    /// Flat text form, groups separated by a space.
    pub fn text(&self) -> String {
        match self {
            Match::Text(t) => t.clone(),
            Match::Groups(g) => g.join(" "),
        }
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// Which match feeds the value: one by index, or all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MatchSelection {
    /// Negative indices count from the end.
    Index(i64),
    All,
}

impl Default for MatchSelection {
    fn default() -> Self {
        MatchSelection::Index(0)
    }
}

pub fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| ScrapeError::Pattern {
        pattern: pattern.to_string(),
        message: match e {
            regex::Error::Syntax(msg) => msg.lines().last().unwrap_or("invalid pattern").trim().to_string(),
            other => other.to_string(),
        },
    })
}

/// All non-overlapping matches of `pattern` in `text`.
///
/// No groups yields the whole match, one group yields that group, more
/// groups yield every group of the match. Unmatched groups are empty.
pub fn find_all(re: &Regex, text: &str) -> Vec<Match> {
    let groups = re.captures_len() - 1;
    re.captures_iter(text)
        .map(|caps| {
            let group = |i: usize| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default();
            match groups {
                0 => Match::Text(group(0)),
                1 => Match::Text(group(1)),
                n => Match::Groups((1..=n).map(group).collect()),
            }
        })
        .collect()
}

/// Like [`find_all`], but no match at all is an error.
pub fn find_some(pattern: &str, text: &str) -> Result<Vec<Match>> {
    let re = compile(pattern)?;
    let found = find_all(&re, text);
    if found.is_empty() {
        return Err(ScrapeError::NoMatches(pattern.to_string()));
    }
    Ok(found)
}

pub fn pick(matches: &[Match], index: i64) -> Result<&Match> {
    let count = matches.len();
    let resolved = if index < 0 {
        count as i64 + index
    } else {
        index
    };
    usize::try_from(resolved)
        .ok()
        .and_then(|i| matches.get(i))
        .ok_or(ScrapeError::MatchIndexOutOfRange { index, count })
}

impl FromStr for MatchSelection {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(MatchSelection::All);
        }
        s.parse()
            .map(MatchSelection::Index)
            .map_err(|_| ScrapeError::InvalidConfig(format!("match selection must be an index or 'all': {}", s)))
    }
}

impl fmt::Display for MatchSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchSelection::Index(i) => write!(f, "{}", i),
            MatchSelection::All => f.write_str("all"),
        }
    }
}

impl TryFrom<String> for MatchSelection {
    type Error = ScrapeError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<MatchSelection> for String {
    fn from(s: MatchSelection) -> String {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "Monday 12.5 kg\nTuesday 7 kg\nWednesday 30.25 kg";

    #[test]
    fn whole_match_without_groups() {
        let re = compile(r"\d+(?:\.\d+)? kg").unwrap();
        let m = find_all(&re, TEXT);
        assert_eq!(
            m,
            vec![
                Match::Text("12.5 kg".into()),
                Match::Text("7 kg".into()),
                Match::Text("30.25 kg".into())
            ]
        );
    }

    #[test]
    fn single_group_is_returned_alone() {
        let re = compile(r"(\d+(?:\.\d+)?) kg").unwrap();
        let m = find_all(&re, TEXT);
        assert_eq!(m[0], Match::Text("12.5".into()));
        assert_eq!(m.len(), 3);
    }

    #[test]
    fn several_groups_are_kept() {
        let re = compile(r"(\w+day) (\d+)").unwrap();
        let m = find_all(&re, TEXT);
        assert_eq!(m[1], Match::Groups(vec!["Tuesday".into(), "7".into()]));
        assert_eq!(m[1].text(), "Tuesday 7");
    }

    #[test]
    fn optional_group_that_did_not_match_is_empty() {
        let re = compile(r"(\d+)(\.\d+)?").unwrap();
        let m = find_all(&re, "7 and 2.5");
        assert_eq!(m[0], Match::Groups(vec!["7".into(), String::new()]));
    }

    #[test]
    fn no_match_is_an_error() {
        let err = find_some(r"\bfoo\b", TEXT).unwrap_err();
        assert!(matches!(err, ScrapeError::NoMatches(ref p) if p == r"\bfoo\b"));
    }

    #[test]
    fn bad_pattern_is_reported() {
        let err = find_some(r"(unclosed", TEXT).unwrap_err();
        match err {
            ScrapeError::Pattern { pattern, message } => {
                assert_eq!(pattern, "(unclosed");
                assert!(!message.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn pick_supports_negative_indices() {
        let m = find_some(r"\d+ kg", TEXT).unwrap();
        assert_eq!(pick(&m, 0).unwrap().text(), "5 kg");
        assert_eq!(pick(&m, -1).unwrap().text(), "25 kg");
        assert!(matches!(
            pick(&m, 3),
            Err(ScrapeError::MatchIndexOutOfRange { index: 3, count: 3 })
        ));
        assert!(pick(&m, -4).is_err());
    }

    #[test]
    fn selection_parsing() {
        assert_eq!("all".parse::<MatchSelection>().unwrap(), MatchSelection::All);
        assert_eq!("-2".parse::<MatchSelection>().unwrap(), MatchSelection::Index(-2));
        assert!("first".parse::<MatchSelection>().is_err());
        assert_eq!(MatchSelection::default(), MatchSelection::Index(0));
    }
}
