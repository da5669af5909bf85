use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScrapeError;
use crate::extract::Value;

/// States at or above this many characters are truncated.
pub const MAX_STATE_LEN: usize = 255;
const TRUNCATED_KEEP: usize = 242;
const TRUNCATED_SUFFIX: &str = " <truncated>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
    Total,
    TotalIncreasing,
}

impl StateClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateClass::Measurement => "measurement",
            StateClass::Total => "total",
            StateClass::TotalIncreasing => "total_increasing",
        }
    }
}

impl fmt::Display for StateClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateClass {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "measurement" => Ok(StateClass::Measurement),
            "total" => Ok(StateClass::Total),
            "total_increasing" => Ok(StateClass::TotalIncreasing),
            other => Err(ScrapeError::InvalidConfig(format!("unknown state class: {}", other))),
        }
    }
}

/// Latest polled value of one target, as a host would display it.
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    pub target_id: i64,
    pub name: String,
    /// `None` while the target is unavailable.
    pub state: Option<String>,
    pub value: Option<Value>,
    pub last_modified: Option<DateTime<FixedOffset>>,
    pub unit_of_measurement: Option<String>,
    pub device_class: Option<String>,
    pub state_class: Option<StateClass>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl Reading {
    pub fn is_available(&self) -> bool {
        self.error.is_none() && self.state.is_some()
    }

    pub fn attributes(&self) -> serde_json::Value {
        serde_json::json!({
            "last_modified": self.last_modified.map(|d| d.to_rfc3339()),
            "unit_of_measurement": self.unit_of_measurement,
            "device_class": self.device_class,
            "state_class": self.state_class,
        })
    }
}

/// Scalar state string for a value: lists become a JSON array.
pub fn state_of(value: &Value) -> String {
    let raw = match value {
        Value::Text(t) => t.clone(),
        Value::List(items) => serde_json::to_string(items).unwrap_or_default(),
    };
    truncate_state(&raw)
}

pub fn truncate_state(s: &str) -> String {
    if s.chars().count() < MAX_STATE_LEN {
        s.to_string()
    } else {
        let kept: String = s.chars().take(TRUNCATED_KEEP).collect();
        format!("{}{}", kept, TRUNCATED_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_states_pass_through() {
        assert_eq!(state_of(&Value::Text("12.5".into())), "12.5");
        let s = "x".repeat(254);
        assert_eq!(truncate_state(&s), s);
    }

    #[test]
    fn long_states_are_cut() {
        let s = "é".repeat(300);
        let t = truncate_state(&s);
        assert!(t.ends_with(" <truncated>"));
        assert_eq!(t.chars().count(), 242 + " <truncated>".len());
        assert!(t.chars().count() < MAX_STATE_LEN);
    }

    #[test]
    fn lists_render_as_json() {
        let v = Value::List(vec!["a".into(), "b\"c".into()]);
        assert_eq!(state_of(&v), r#"["a","b\"c"]"#);
    }

    #[test]
    fn state_class_names() {
        assert_eq!("total_increasing".parse::<StateClass>().unwrap(), StateClass::TotalIncreasing);
        assert!("sum".parse::<StateClass>().is_err());
        assert_eq!(serde_json::to_string(&StateClass::Measurement).unwrap(), "\"measurement\"");
    }

    #[test]
    fn attributes_carry_last_modified() {
        let r = Reading {
            target_id: 1,
            name: "Level".into(),
            state: Some("3".into()),
            value: Some(Value::Text("3".into())),
            last_modified: crate::pdf::parse_pdf_date("D:20240301120000Z"),
            unit_of_measurement: Some("m".into()),
            device_class: None,
            state_class: Some(StateClass::Measurement),
            updated_at: Utc::now(),
            error: None,
        };
        assert!(r.is_available());
        let attrs = r.attributes();
        assert_eq!(attrs["last_modified"], "2024-03-01T12:00:00+00:00");
        assert_eq!(attrs["state_class"], "measurement");
    }
}
