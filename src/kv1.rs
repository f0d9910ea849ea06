//! KV1 text file writer.
//!
//! A KV1 file is a version line, a free-text header between two `#HEADER`
//! lines, and one `;`-terminated statement per variable:
//!
//! ```text
//! #VERSION 1.0
//!
//! #HEADER
//! RC low-pass, 1 Vpp drive
//! #HEADER
//!
//! d shunt 100.0;
//! s mode "frequency";
//! b dual_pass True;
//! m<d> freqs [100.0, 1000.0];
//! m<s> labels ["in", "out"];
//! ```
//!
//! Empty lists and unsupported values are skipped with a warning rather
//! than written. There is no reader.

use crate::error::SweepResult;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// First line of every KV1 file.
pub const VERSION_LINE: &str = "#VERSION 1.0";
const HEADER_MARKER: &str = "#HEADER";

/// A value that can be written as a KV1 statement.
#[derive(Debug, Clone, PartialEq)]
pub enum KvValue {
    /// `d`
    Real(f64),
    /// `s`
    Text(String),
    /// `b`
    Bool(bool),
    /// `m<d>`
    Reals(Vec<f64>),
    /// `m<s>`
    Texts(Vec<String>),
    /// `m<b>`
    Bools(Vec<bool>),
}

impl From<f64> for KvValue {
    fn from(v: f64) -> Self {
        KvValue::Real(v)
    }
}

impl From<i64> for KvValue {
    fn from(v: i64) -> Self {
        KvValue::Real(v as f64)
    }
}

impl From<bool> for KvValue {
    fn from(v: bool) -> Self {
        KvValue::Bool(v)
    }
}

impl From<&str> for KvValue {
    fn from(v: &str) -> Self {
        KvValue::Text(v.to_string())
    }
}

impl From<String> for KvValue {
    fn from(v: String) -> Self {
        KvValue::Text(v)
    }
}

impl From<Vec<f64>> for KvValue {
    fn from(v: Vec<f64>) -> Self {
        KvValue::Reals(v)
    }
}

impl From<&[f64]> for KvValue {
    fn from(v: &[f64]) -> Self {
        KvValue::Reals(v.to_vec())
    }
}

impl From<Vec<String>> for KvValue {
    fn from(v: Vec<String>) -> Self {
        KvValue::Texts(v)
    }
}

impl From<Vec<bool>> for KvValue {
    fn from(v: Vec<bool>) -> Self {
        KvValue::Bools(v)
    }
}

impl KvValue {
    /// Convert a JSON value; `None` for nulls, objects, nested or mixed arrays.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(KvValue::Real),
            Value::String(s) => Some(KvValue::Text(s.clone())),
            Value::Bool(b) => Some(KvValue::Bool(*b)),
            Value::Array(items) => match items.first() {
                // kind of an empty list is irrelevant, it is skipped anyway
                None => Some(KvValue::Reals(Vec::new())),
                Some(Value::Number(_)) => items
                    .iter()
                    .map(Value::as_f64)
                    .collect::<Option<Vec<_>>>()
                    .map(KvValue::Reals),
                Some(Value::String(_)) => items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .map(KvValue::Texts),
                Some(Value::Bool(_)) => items
                    .iter()
                    .map(Value::as_bool)
                    .collect::<Option<Vec<_>>>()
                    .map(KvValue::Bools),
                Some(_) => None,
            },
            Value::Null | Value::Object(_) => None,
        }
    }

    fn is_empty_list(&self) -> bool {
        match self {
            KvValue::Reals(v) => v.is_empty(),
            KvValue::Texts(v) => v.is_empty(),
            KvValue::Bools(v) => v.is_empty(),
            _ => false,
        }
    }

    fn statement(&self, name: &str) -> String {
        match self {
            KvValue::Real(v) => format!("d {name} {};", real(*v)),
            KvValue::Text(s) => format!("s {name} \"{s}\";"),
            KvValue::Bool(b) => format!("b {name} {};", boolean(*b)),
            KvValue::Reals(v) => list("m<d>", name, v.iter().map(|x| real(*x))),
            KvValue::Texts(v) => list("m<s>", name, v.iter().map(|s| format!("\"{s}\""))),
            KvValue::Bools(v) => list("m<b>", name, v.iter().map(|b| boolean(*b).to_string())),
        }
    }
}

/// Shortest representation that reads back to the same value (`100.0`, `1e-7`).
fn real(v: f64) -> String {
    format!("{v:?}")
}

fn boolean(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

fn list(tag: &str, name: &str, items: impl Iterator<Item = String>) -> String {
    let body: Vec<String> = items.collect();
    format!("{tag} {name} [{}];", body.join(", "))
}

/// A KV1 file being assembled in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Kv1Document {
    text: String,
}

impl Kv1Document {
    /// Start a document with the version line and `header`.
    pub fn begin(header: &str) -> Self {
        Self {
            text: format!("{VERSION_LINE}\n\n{HEADER_MARKER}\n{header}\n{HEADER_MARKER}\n\n"),
        }
    }

    /// Append one variable. Empty lists are skipped.
    pub fn assemble(&mut self, name: &str, value: impl Into<KvValue>) -> &mut Self {
        let value = value.into();
        if value.is_empty_list() {
            warn!(name, "skipping empty list");
            return self;
        }
        self.text.push_str(&value.statement(name));
        self.text.push('\n');
        self
    }

    /// Append a dynamically typed variable; unsupported kinds are skipped.
    pub fn assemble_json(&mut self, name: &str, value: &Value) -> &mut Self {
        match KvValue::from_json(value) {
            Some(value) => self.assemble(name, value),
            None => {
                warn!(name, "unsupported type, skipping");
                self
            }
        }
    }

    /// Document text so far.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Consume the document into its text.
    pub fn into_string(self) -> String {
        self.text
    }

    /// Write the document to `path`, replacing any existing file.
    pub fn write_to(&self, path: &Path) -> SweepResult<()> {
        fs::write(path, &self.text)?;
        debug!(path = %path.display(), bytes = self.text.len(), "KV1 file written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    #[test]
    fn header_block_layout() {
        let doc = Kv1Document::begin("two\nlines");
        assert_eq!(
            doc.as_str(),
            "#VERSION 1.0\n\n#HEADER\ntwo\nlines\n#HEADER\n\n"
        );
    }

    #[test]
    fn statements_per_kind() {
        let mut doc = Kv1Document::begin("");
        doc.assemble("r", 100.0)
            .assemble("tiny", 1e-7)
            .assemble("name", "scan")
            .assemble("ok", true)
            .assemble("freqs", vec![100.0, 1500.5])
            .assemble("labels", vec!["in".to_string(), "out".to_string()])
            .assemble("flags", vec![false, true]);

        let body: Vec<&str> = doc.as_str().lines().skip(6).collect();
        assert_eq!(
            body,
            vec![
                "d r 100.0;",
                "d tiny 1e-7;",
                "s name \"scan\";",
                "b ok True;",
                "m<d> freqs [100.0, 1500.5];",
                "m<s> labels [\"in\", \"out\"];",
                "m<b> flags [False, True];",
            ]
        );
    }

    #[test]
    #[traced_test]
    fn empty_list_skipped_with_warning() {
        let mut doc = Kv1Document::begin("");
        doc.assemble("nothing", Vec::<f64>::new());
        assert!(!doc.as_str().contains("nothing"));
        assert!(logs_contain("skipping empty list"));
    }

    #[test]
    #[traced_test]
    fn unsupported_json_skipped() {
        let mut doc = Kv1Document::begin("");
        doc.assemble_json("meta", &json!({"a": 1}))
            .assemble_json("nested", &json!([[1, 2]]))
            .assemble_json("missing", &json!(null))
            .assemble_json("gain", &json!([0.5, 2]));

        assert_eq!(doc.as_str().lines().last(), Some("m<d> gain [0.5, 2.0];"));
        assert!(!doc.as_str().contains("meta"));
        assert!(logs_contain("unsupported type"));
    }

    #[test]
    fn writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.kv1");
        let mut doc = Kv1Document::begin("bench");
        doc.assemble("freqs", vec![1.0]);
        doc.write_to(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), doc.into_string());
    }
}
