//! Central inbounds decoded from their stored JSON blobs.

use serde_json::{Value, json};
use xgrid_core::document::{Document, deep_clone, parse_document};
use xgrid_state::CentralInbound;

use crate::error::{DistributionError, DistributionResult};

/// A central inbound with its settings sections parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInbound {
    pub id: u64,
    pub tag: String,
    pub protocol: String,
    pub port: u16,
    pub settings: Document,
    pub stream_settings: Option<Document>,
    pub sniffing: Option<Document>,
    pub client_stats: bool,
}

impl ResolvedInbound {
    /// Decode a stored inbound. A malformed blob is an error naming the
    /// inbound and the section.
    pub fn resolve(inbound: &CentralInbound) -> DistributionResult<Self> {
        let parse = |section: &'static str, blob: &str| {
            parse_document(blob).map_err(|source| DistributionError::InvalidInbound {
                name: inbound.name.clone(),
                section,
                source,
            })
        };
        let optional = |name: &'static str, blob: &str| -> DistributionResult<Option<Document>> {
            if blob.trim().is_empty() {
                Ok(None)
            } else {
                parse(name, blob).map(Some)
            }
        };

        Ok(Self {
            id: inbound.id,
            tag: inbound.name.clone(),
            protocol: inbound.protocol.clone(),
            port: inbound.port,
            settings: parse("settings", &inbound.settings)?,
            stream_settings: optional("stream settings", &inbound.stream_settings)?,
            sniffing: optional("sniffing", &inbound.sniffing)?,
            client_stats: inbound.client_stats,
        })
    }

    /// Engine-facing inbound object.
    ///
    /// `settings` is always present; `streamSettings` and `sniffing` only when
    /// configured. Inbounds collecting client stats carry an
    /// `allocate: {strategy: "always"}` hint.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("tag".into(), Value::String(self.tag.clone()));
        doc.insert("protocol".into(), Value::String(self.protocol.clone()));
        doc.insert("port".into(), Value::from(self.port));
        doc.insert("settings".into(), Value::Object(deep_clone(&self.settings)));
        if let Some(stream) = &self.stream_settings {
            doc.insert("streamSettings".into(), Value::Object(deep_clone(stream)));
        }
        if let Some(sniffing) = &self.sniffing {
            doc.insert("sniffing".into(), Value::Object(deep_clone(sniffing)));
        }
        if self.client_stats {
            doc.insert("allocate".into(), json!({"strategy": "always"}));
        }
        doc
    }
}
