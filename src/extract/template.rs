use minijinja::value::Value as JinjaValue;
use minijinja::{context, Environment, ErrorKind, UndefinedBehavior};
use regex::Regex;

use super::Value;
use crate::error::Result;

fn environment<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_filter("regex_replace", regex_replace);
    env.add_filter("regex_findall_index", regex_findall_index);
    env.add_filter("multiply", multiply);
    env
}

/// Render `source` with the extracted value bound to `value`.
///
/// The output is trimmed; templates never produce structured results.
pub fn render(source: &str, value: &Value) -> Result<String> {
    let value = match value {
        Value::Text(t) => JinjaValue::from(t.as_str()),
        Value::List(items) => JinjaValue::from(items.clone()),
    };
    let out = environment().render_str(source, context! { value => value })?;
    Ok(out.trim().to_string())
}

/// Check that a template compiles without rendering it.
pub fn validate(source: &str) -> Result<()> {
    let env = environment();
    env.template_from_str(source)?;
    Ok(())
}

fn bad_regex(e: regex::Error) -> minijinja::Error {
    minijinja::Error::new(ErrorKind::InvalidOperation, format!("invalid regex: {}", e))
}

fn regex_replace(value: String, find: String, replace: String) -> std::result::Result<String, minijinja::Error> {
    let re = Regex::new(&find).map_err(bad_regex)?;
    Ok(re.replace_all(&value, replace.as_str()).into_owned())
}

fn regex_findall_index(
    value: String,
    find: String,
    index: Option<i64>,
) -> std::result::Result<String, minijinja::Error> {
    let re = Regex::new(&find).map_err(bad_regex)?;
    let found = super::matches::find_all(&re, &value);
    super::matches::pick(&found, index.unwrap_or(0))
        .map(|m| m.text())
        .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

fn multiply(value: JinjaValue, factor: f64) -> std::result::Result<f64, minijinja::Error> {
    let number = match value.as_str() {
        Some(s) => s.trim().parse::<f64>().map_err(|_| {
            minijinja::Error::new(ErrorKind::InvalidOperation, format!("not a number: {}", s))
        })?,
        None => f64::try_from(value)?,
    };
    Ok(number * factor)
}
