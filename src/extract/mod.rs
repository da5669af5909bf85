pub mod matches;
pub mod pages;
pub mod template;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrapeError};
use crate::sensor::StateClass;
use matches::MatchSelection;
use pages::PageRange;

/// What to pull out of a document and how to present it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub pages: PageRange,
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub selection: MatchSelection,
    #[serde(default)]
    pub value_template: Option<String>,
    #[serde(default)]
    pub unit_of_measurement: Option<String>,
    #[serde(default)]
    pub device_class: Option<String>,
    #[serde(default)]
    pub state_class: Option<StateClass>,
}

impl TargetConfig {
    pub fn new(name: impl Into<String>, pages: PageRange) -> Self {
        TargetConfig {
            name: name.into(),
            pages,
            regex: None,
            selection: MatchSelection::default(),
            value_template: None,
            unit_of_measurement: None,
            device_class: None,
            state_class: None,
        }
    }

    /// Static checks that need no document: name, pattern, template syntax.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ScrapeError::InvalidConfig("name is required".to_string()));
        }
        if let Some(pattern) = self.regex.as_deref().filter(|p| !p.is_empty()) {
            matches::compile(pattern)?;
        }
        if let Some(tpl) = self.value_template.as_deref().filter(|t| !t.is_empty()) {
            template::validate(tpl)?;
        }
        Ok(())
    }
}

/// Final value of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    List(Vec<String>),
}

impl From<matches::Match> for Value {
    fn from(m: matches::Match) -> Self {
        match m {
            matches::Match::Text(t) => Value::Text(t),
            matches::Match::Groups(g) => Value::List(g),
        }
    }
}

/// Page range join → regex find-all → selection → template.
pub fn run_target(pages: &[String], target: &TargetConfig) -> Result<Value> {
    let text = pages::select_text(pages, &target.pages)?;

    let value = match target.regex.as_deref().filter(|p| !p.is_empty()) {
        None => Value::Text(text),
        Some(pattern) => {
            let found = matches::find_some(pattern, &text)?;
            match target.selection {
                MatchSelection::Index(i) => matches::pick(&found, i)?.clone().into(),
                MatchSelection::All => Value::List(found.iter().map(|m| m.text()).collect()),
            }
        }
    };

    match target.value_template.as_deref().filter(|t| !t.is_empty()) {
        Some(tpl) => Ok(Value::Text(template::render(tpl, &value)?)),
        None => Ok(value),
    }
}
