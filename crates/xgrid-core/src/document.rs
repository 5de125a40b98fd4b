//! Generic settings documents.
//!
//! Inbound settings, stream settings and per-protocol client entries vary by
//! proxy protocol, so they travel as ordered JSON objects instead of fixed
//! structs. Key order is preserved end to end so rendered configuration files
//! are stable.

use serde_json::{Map, Value};

/// Ordered key/value document.
pub type Document = Map<String, Value>;

/// Structural copy of a document.
///
/// Nested objects and arrays are rebuilt node by node, so the result shares
/// nothing with `doc`.
pub fn deep_clone(doc: &Document) -> Document {
    doc.iter()
        .map(|(key, value)| (key.clone(), deep_clone_value(value)))
        .collect()
}

/// Structural copy of a list of documents.
pub fn deep_clone_all(docs: &[Document]) -> Vec<Document> {
    docs.iter().map(deep_clone).collect()
}

fn deep_clone_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(deep_clone(map)),
        Value::Array(items) => Value::Array(items.iter().map(deep_clone_value).collect()),
        scalar => scalar.clone(),
    }
}

/// Parse a stored JSON blob into a document.
///
/// Empty or whitespace-only blobs yield an empty document. A blob that is
/// valid JSON but not an object is rejected.
pub fn parse_document(blob: &str) -> Result<Document, serde_json::Error> {
    if blob.trim().is_empty() {
        return Ok(Document::new());
    }
    serde_json::from_str(blob)
}

/// String field lookup. Non-string values read as absent.
pub fn get_str<'a>(doc: &'a Document, key: &str) -> Option<&'a str> {
    doc.get(key).and_then(Value::as_str)
}

/// Nested object lookup.
pub fn get_object<'a>(doc: &'a Document, key: &str) -> Option<&'a Document> {
    doc.get(key).and_then(Value::as_object)
}

/// Typed accessors for the stream-settings fields the subscription codec reads.
///
/// Every accessor treats a missing or mistyped field as absent; none of them
/// fail.
pub trait StreamSettingsExt {
    /// Transport network (`tcp`, `ws`, `grpc`, ...).
    fn network(&self) -> Option<&str>;

    /// True when `security` is `tls` or `reality` (case-insensitive).
    fn tls_enabled(&self) -> bool;

    /// `wsSettings.path`.
    fn ws_path(&self) -> Option<&str>;

    /// `wsSettings.headers.Host`.
    fn ws_host(&self) -> Option<&str>;
}

impl StreamSettingsExt for Document {
    fn network(&self) -> Option<&str> {
        get_str(self, "network").filter(|s| !s.is_empty())
    }

    fn tls_enabled(&self) -> bool {
        get_str(self, "security")
            .map(|s| s.eq_ignore_ascii_case("tls") || s.eq_ignore_ascii_case("reality"))
            .unwrap_or(false)
    }

    fn ws_path(&self) -> Option<&str> {
        get_object(self, "wsSettings")
            .and_then(|ws| get_str(ws, "path"))
            .filter(|s| !s.is_empty())
    }

    fn ws_host(&self) -> Option<&str> {
        get_object(self, "wsSettings")
            .and_then(|ws| get_object(ws, "headers"))
            .and_then(|headers| get_str(headers, "Host"))
            .filter(|s| !s.is_empty())
    }
}
