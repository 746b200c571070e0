//! Output rendering for query results
//!
//! Thin formatting layer shared by `info details`, hash export and search
//! export. Operates on `serde_json::Value` objects so every caller can
//! render whatever it already serializes.

use crate::error::{Error, Result};
use serde_json::Value;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFormat {
    Json,
    Yaml,
    Csv,
    Markdown,
    Table,
}

impl FromStr for RenderFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(RenderFormat::Json),
            "yaml" => Ok(RenderFormat::Yaml),
            "csv" => Ok(RenderFormat::Csv),
            "markdown" | "md" => Ok(RenderFormat::Markdown),
            "table" => Ok(RenderFormat::Table),
            other => Err(Error::Invalid(format!("unknown output format: {other}"))),
        }
    }
}

/// Render a JSON object in the requested format.
pub fn render(value: &Value, format: RenderFormat) -> Result<String> {
    match format {
        RenderFormat::Json => Ok(serde_json::to_string_pretty(value)?),
        RenderFormat::Yaml => Ok(serde_yaml::to_string(value)?),
        RenderFormat::Csv => Ok(to_csv(value)),
        RenderFormat::Markdown => Ok(to_table(value, true)),
        RenderFormat::Table => Ok(to_table(value, false)),
    }
}

fn scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(scalar)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => v.to_string(),
        other => other.to_string(),
    }
}

fn rows(value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), scalar(v))).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), scalar(v)))
            .collect(),
        other => vec![("value".to_string(), scalar(other))],
    }
}

fn to_csv(value: &Value) -> String {
    rows(value)
        .into_iter()
        .map(|(k, v)| format!("{k},{v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn to_table(value: &Value, markdown: bool) -> String {
    let rows = rows(value);
    let key_width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(3).max(3);
    let val_width = rows.iter().map(|(_, v)| v.len()).max().unwrap_or(5).max(5);

    let mut out = String::new();
    out.push_str(&format!(
        "| {:key_width$} | {:val_width$} |\n",
        "Key", "Value"
    ));
    out.push_str(&format!(
        "| {:-<key_width$} | {:-<val_width$} |\n",
        "", ""
    ));
    for (k, v) in rows {
        out.push_str(&format!("| {k:key_width$} | {v:val_width$} |\n"));
    }
    if !markdown {
        let border = format!("+{}+{}+\n", "-".repeat(key_width + 2), "-".repeat(val_width + 2));
        return format!("{border}{out}{border}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_from_str() {
        assert_eq!("json".parse::<RenderFormat>().unwrap(), RenderFormat::Json);
        assert_eq!("YAML".parse::<RenderFormat>().unwrap(), RenderFormat::Yaml);
        assert!("xml".parse::<RenderFormat>().is_err());
    }

    #[test]
    fn test_csv_joins_lists() {
        let v = json!({"name": "foo", "deps": ["a", "b"]});
        let csv = render(&v, RenderFormat::Csv).unwrap();
        assert!(csv.contains("name,foo"));
        assert!(csv.contains("deps,a,b"));
    }

    #[test]
    fn test_markdown_has_header_row() {
        let v = json!({"name": "foo"});
        let md = render(&v, RenderFormat::Markdown).unwrap();
        assert!(md.starts_with("| Key"));
        assert!(md.contains("| name"));
    }

    #[test]
    fn test_json_round_trips() {
        let v = json!({"a": 1});
        let s = render(&v, RenderFormat::Json).unwrap();
        let back: serde_json::Value = serde_json::from_str(&s).unwrap();
        assert_eq!(back, v);
    }
}
