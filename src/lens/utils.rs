//! Common utility functions for lens output

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default maximum length of a source URL in tables
pub const DEFAULT_URL_MAX_LEN: usize = 60;

/// Output format shared by every command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// whois-style text and tables (default)
    #[default]
    Text,
    /// Compact JSON on one line
    Json,
    /// Pretty-printed JSON with indentation
    JsonPretty,
}

impl OutputFormat {
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json | Self::JsonPretty)
    }

    /// Get a list of all format names for help text
    pub fn all_names() -> &'static [&'static str] {
        &["text", "json", "json-pretty"]
    }

    /// Serialize `value` in this format; `None` for [`OutputFormat::Text`]
    pub fn to_json<T: Serialize>(&self, value: &T) -> Option<serde_json::Result<String>> {
        match self {
            Self::Text => None,
            Self::Json => Some(serde_json::to_string(value)),
            Self::JsonPretty => Some(serde_json::to_string_pretty(value)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::JsonPretty => write!(f, "json-pretty"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "table" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "json-pretty" | "jsonpretty" => Ok(Self::JsonPretty),
            _ => Err(format!(
                "Unknown output format '{}'. Valid formats: {}",
                s,
                Self::all_names().join(", ")
            )),
        }
    }
}

/// Truncate a string to `max_len` characters, ending in "..." when cut
///
/// ```
/// use whoislite::lens::utils::truncate_name;
///
/// assert_eq!(truncate_name("asn.txt", 20), "asn.txt");
/// assert_eq!(truncate_name("https://ftp.ripe.net/ripe/asnames/asn.txt", 20), "https://ftp.ripe....");
/// ```
pub fn truncate_name(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        name.to_string()
    } else {
        let truncated: String = name.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("TEXT".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert_eq!("jsonpretty".parse::<OutputFormat>(), Ok(OutputFormat::JsonPretty));
        assert!("psv".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::JsonPretty.to_string(), "json-pretty");
        assert!(!OutputFormat::default().is_json());
    }

    #[test]
    fn test_to_json() {
        assert!(OutputFormat::Text.to_json(&1).is_none());
        let json = OutputFormat::Json.to_json(&vec!["a"]).unwrap().unwrap();
        assert_eq!(json, r#"["a"]"#);
    }

    #[test]
    fn test_truncate_name() {
        assert_eq!(truncate_name("12345678901234567890", 20), "12345678901234567890");
        assert_eq!(
            truncate_name("This is a very long source name", 20),
            "This is a very lo..."
        );
        assert_eq!(truncate_name("", 20), "");
    }
}
