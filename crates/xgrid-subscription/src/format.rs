use std::fmt;

use crate::error::{SubscriptionError, SubscriptionResult};

/// Output format of a subscription bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Clash,
    V2ray,
    Shadowrocket,
}

impl Format {
    /// Parse a `format` query value. Missing or empty means JSON.
    pub fn parse(raw: Option<&str>) -> SubscriptionResult<Self> {
        let raw = raw.map(str::trim).unwrap_or_default();
        match raw.to_ascii_lowercase().as_str() {
            "" | "json" => Ok(Self::Json),
            "clash" => Ok(Self::Clash),
            "v2ray" | "v2" => Ok(Self::V2ray),
            "shadowrocket" | "sr" => Ok(Self::Shadowrocket),
            _ => Err(SubscriptionError::UnsupportedFormat(raw.to_string())),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Clash => "application/yaml",
            Self::V2ray | Self::Shadowrocket => "text/plain",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Clash => "clash",
            Self::V2ray => "v2ray",
            Self::Shadowrocket => "shadowrocket",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_and_case() {
        assert_eq!(Format::parse(None).unwrap(), Format::Json);
        assert_eq!(Format::parse(Some("")).unwrap(), Format::Json);
        assert_eq!(Format::parse(Some("CLASH")).unwrap(), Format::Clash);
        assert_eq!(Format::parse(Some("v2")).unwrap(), Format::V2ray);
        assert_eq!(Format::parse(Some("Sr")).unwrap(), Format::Shadowrocket);
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(matches!(
            Format::parse(Some("surge")),
            Err(SubscriptionError::UnsupportedFormat(f)) if f == "surge"
        ));
    }

    #[test]
    fn content_types() {
        assert_eq!(Format::Json.content_type(), "application/json");
        assert_eq!(Format::Clash.content_type(), "application/yaml");
        assert_eq!(Format::V2ray.content_type(), "text/plain");
        assert_eq!(Format::Shadowrocket.content_type(), "text/plain");
    }
}
