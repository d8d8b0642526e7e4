//! Whois lens arguments

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a whois query looks up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum WhoisQueryType {
    /// aut-num object, ASN metadata and referenced organisations
    #[default]
    AutNum,
    /// as-set objects by name
    AsSet,
    /// aut-num and as-set objects maintained by a mntner
    MntBy,
    /// mntner object and the roles it maintains
    Mntner,
    /// route/route6 objects originated by an ASN
    RouteOrigin,
    /// route object of a prefix and its origin ASNs
    NetworkOrigin,
    /// ASN metadata only
    Organisation,
    /// delegation record and geolocation of an address
    Allocation,
}

impl WhoisQueryType {
    pub fn name(&self) -> &'static str {
        match self {
            WhoisQueryType::AutNum => "aut-num",
            WhoisQueryType::AsSet => "as-set",
            WhoisQueryType::MntBy => "mnt-by",
            WhoisQueryType::Mntner => "mntner",
            WhoisQueryType::RouteOrigin => "route-origin",
            WhoisQueryType::NetworkOrigin => "network-origin",
            WhoisQueryType::Organisation => "organisation",
            WhoisQueryType::Allocation => "allocation",
        }
    }
}

impl fmt::Display for WhoisQueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Arguments for a whois query
///
/// ASN keys accept `AS64496`, `as64496` or `64496`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::Args))]
pub struct WhoisQueryArgs {
    /// Query type
    #[cfg_attr(feature = "cli", clap(short = 't', long = "type", value_enum, default_value_t))]
    #[serde(default, rename = "type")]
    pub query_type: WhoisQueryType,

    /// ASN, object name, maintainer id, prefix or address
    #[cfg_attr(feature = "cli", clap(value_name = "KEY"))]
    pub key: String,
}

impl WhoisQueryArgs {
    pub fn new(query_type: WhoisQueryType, key: &str) -> Self {
        Self {
            query_type,
            key: key.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_type_names() {
        assert_eq!(WhoisQueryType::default(), WhoisQueryType::AutNum);
        assert_eq!(WhoisQueryType::NetworkOrigin.to_string(), "network-origin");

        let args: WhoisQueryArgs =
            serde_json::from_str(r#"{"type": "mnt-by", "key": "MAINT-FOO"}"#).unwrap();
        assert_eq!(args.query_type, WhoisQueryType::MntBy);
        assert_eq!(args.key, "MAINT-FOO");
    }
}
