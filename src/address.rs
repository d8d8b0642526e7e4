//! Numeric address codec
//!
//! Converts registry-style allocation descriptions (start address plus host
//! count or prefix length) into canonical CIDR text, and addresses into
//! fixed-width decimal range bounds. Bounds are zero-padded to
//! [`RANGE_BOUND_WIDTH`] digits so plain string comparison in SQLite orders
//! them numerically, for IPv4 and IPv6 alike.

use ipnet::IpNet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Number of decimal digits in a stored range bound (enough for any u128)
pub const RANGE_BOUND_WIDTH: usize = 40;

/// Errors produced by the address codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Host count or prefix length outside the valid range for the family
    InvalidRange(String),
    /// ASN text is not a positive 32-bit integer
    InvalidAsn(String),
    /// Address text could not be parsed
    InvalidAddress(String),
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::InvalidRange(msg) => write!(f, "Invalid range: {}", msg),
            AddressError::InvalidAsn(msg) => write!(f, "Invalid ASN: {}", msg),
            AddressError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
        }
    }
}

impl std::error::Error for AddressError {}

/// Build an IPv4 CIDR from a start address and a host count.
///
/// The prefix length is `32 - floor(log2(host_count))`, so counts that are
/// not a power of two round down to the enclosing block size.
pub fn ipv4_to_cidr(address: &str, host_count: i64) -> Result<String, AddressError> {
    let addr: Ipv4Addr = address
        .trim()
        .parse()
        .map_err(|_| AddressError::InvalidAddress(address.to_string()))?;

    if host_count <= 0 {
        return Err(AddressError::InvalidRange(format!(
            "host count {} for {}",
            host_count, address
        )));
    }

    let log2 = 63 - i64::from(host_count.leading_zeros());
    let prefix = 32 - log2;
    if !(0..=32).contains(&prefix) {
        return Err(AddressError::InvalidRange(format!(
            "host count {} for {}",
            host_count, address
        )));
    }

    Ok(format!("{}/{}", addr, prefix))
}

/// Build an IPv6 CIDR from a start address and a prefix length.
pub fn ipv6_to_cidr(address: &str, prefix_len: i64) -> Result<String, AddressError> {
    let addr: Ipv6Addr = address
        .trim()
        .parse()
        .map_err(|_| AddressError::InvalidAddress(address.to_string()))?;

    if !(0..=128).contains(&prefix_len) {
        return Err(AddressError::InvalidRange(format!(
            "prefix length {} for {}",
            prefix_len, address
        )));
    }

    Ok(format!("{}/{}", addr, prefix_len))
}

/// Convert a bare address or a CIDR to its fixed-width range bound.
///
/// For CIDR input the network address is used.
pub fn address_to_range_bound(address: &str) -> Result<String, AddressError> {
    Ok(ip_to_range_bound(parse_address(address)?))
}

/// First and last range bounds covered by a CIDR.
pub fn network_bounds(cidr: &str) -> Result<(String, String), AddressError> {
    let net: IpNet = cidr
        .trim()
        .parse()
        .map_err(|_| AddressError::InvalidAddress(cidr.to_string()))?;
    Ok((ip_to_range_bound(net.network()), ip_to_range_bound(net.broadcast())))
}

/// Parse a bare address or the network address of a CIDR.
pub fn parse_address(address: &str) -> Result<IpAddr, AddressError> {
    let text = address.trim();
    if text.contains('/') {
        let net: IpNet = text
            .parse()
            .map_err(|_| AddressError::InvalidAddress(address.to_string()))?;
        Ok(net.network())
    } else {
        text.parse()
            .map_err(|_| AddressError::InvalidAddress(address.to_string()))
    }
}

/// Canonical CIDR text of a network, or `None` if the input is not a CIDR
///
/// Host bits are cleared: `192.0.2.5/24` becomes `192.0.2.0/24`.
pub fn canonical_network(cidr: &str) -> Option<String> {
    cidr.trim()
        .parse::<IpNet>()
        .ok()
        .map(|n| n.trunc().to_string())
}

/// Fixed-width range bound of a parsed address
pub fn ip_to_range_bound(addr: IpAddr) -> String {
    let value: u128 = match addr {
        IpAddr::V4(a) => u128::from(u32::from(a)),
        IpAddr::V6(a) => u128::from(a),
    };
    format!("{:0width$}", value, width = RANGE_BOUND_WIDTH)
}

/// Numeric width (`last - first`) of a stored range.
pub fn range_width(firstip: &str, lastip: &str) -> Option<u128> {
    let first: u128 = firstip.parse().ok()?;
    let last: u128 = lastip.parse().ok()?;
    last.checked_sub(first)
}

/// Validate an ASN given as decimal text.
pub fn validate_asn(text: &str) -> Result<u32, AddressError> {
    match text.trim().parse::<u32>() {
        Ok(asn) if asn > 0 => Ok(asn),
        _ => Err(AddressError::InvalidAsn(text.to_string())),
    }
}

/// Parse `AS123`, `as123` or `123` into an ASN.
pub fn parse_as_key(text: &str) -> Result<u32, AddressError> {
    let trimmed = text.trim();
    let digits = match trimmed.get(..2) {
        Some(prefix) if prefix.eq_ignore_ascii_case("as") => &trimmed[2..],
        _ => trimmed,
    };
    validate_asn(digits).map_err(|_| AddressError::InvalidAsn(text.to_string()))
}

/// RPSL-style key for an ASN, e.g. `AS13335`
pub fn as_key(asn: u32) -> String {
    format!("AS{}", asn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_to_cidr() {
        assert_eq!(
            ipv4_to_cidr("212.90.160.0", 8192).unwrap(),
            "212.90.160.0/19"
        );
        assert_eq!(ipv4_to_cidr("103.2.56.0", 256).unwrap(), "103.2.56.0/24");
        assert_eq!(ipv4_to_cidr("10.0.0.0", 1).unwrap(), "10.0.0.0/32");
        // non power of two rounds down to the enclosing block
        assert_eq!(ipv4_to_cidr("10.0.0.0", 768).unwrap(), "10.0.0.0/23");
    }

    #[test]
    fn test_ipv4_to_cidr_invalid() {
        assert!(matches!(
            ipv4_to_cidr("10.0.0.0", 0),
            Err(AddressError::InvalidRange(_))
        ));
        assert!(matches!(
            ipv4_to_cidr("10.0.0.0", -4),
            Err(AddressError::InvalidRange(_))
        ));
        assert!(matches!(
            ipv4_to_cidr("10.0.0.0", 1 << 33),
            Err(AddressError::InvalidRange(_))
        ));
        assert!(matches!(
            ipv4_to_cidr("10.0.0", 256),
            Err(AddressError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_ipv6_to_cidr() {
        assert_eq!(ipv6_to_cidr("2001:db8::", 32).unwrap(), "2001:db8::/32");
        assert_eq!(
            ipv6_to_cidr("2001:0db8:0000:0000::", 48).unwrap(),
            "2001:db8::/48"
        );
        assert!(matches!(
            ipv6_to_cidr("2001:db8::", 129),
            Err(AddressError::InvalidRange(_))
        ));
        assert!(matches!(
            ipv6_to_cidr("2001:db8::", -1),
            Err(AddressError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_range_bound_format() {
        let bound = address_to_range_bound("0.0.1.0").unwrap();
        assert_eq!(bound.len(), RANGE_BOUND_WIDTH);
        assert!(bound.ends_with("256"));
        assert_eq!(
            address_to_range_bound("10.0.0.0/8").unwrap(),
            address_to_range_bound("10.0.0.0").unwrap()
        );
        assert_eq!(
            address_to_range_bound("ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff").unwrap(),
            format!("0{}", u128::MAX)
        );
    }

    #[test]
    fn test_range_bound_monotonic() {
        let ordered = [
            "0.0.0.0",
            "1.2.3.4",
            "9.255.255.255",
            "10.0.0.0",
            "255.255.255.255",
            "::1:0:0:0",
            "2001:db8::",
            "2001:db8::1",
            "fe80::",
        ];
        let bounds: Vec<String> = ordered
            .iter()
            .map(|a| address_to_range_bound(a).unwrap())
            .collect();
        for pair in bounds.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_network_bounds() {
        let (first, last) = network_bounds("192.0.2.0/24").unwrap();
        assert_eq!(first, address_to_range_bound("192.0.2.0").unwrap());
        assert_eq!(last, address_to_range_bound("192.0.2.255").unwrap());
        assert_eq!(range_width(&first, &last), Some(255));
    }

    #[test]
    fn test_asn_parsing() {
        assert_eq!(validate_asn("13335").unwrap(), 13335);
        assert!(validate_asn("0").is_err());
        assert!(validate_asn("-5").is_err());
        assert!(validate_asn("4294967296").is_err());
        assert!(validate_asn("abc").is_err());

        assert_eq!(parse_as_key("AS15169").unwrap(), 15169);
        assert_eq!(parse_as_key("as15169").unwrap(), 15169);
        assert_eq!(parse_as_key("15169").unwrap(), 15169);
        assert!(parse_as_key("AS").is_err());
        assert_eq!(as_key(64496), "AS64496");
    }

    #[test]
    fn test_canonical_network() {
        assert_eq!(
            canonical_network("2001:0DB8:0000::/32"),
            Some("2001:db8::/32".to_string())
        );
        assert_eq!(canonical_network("192.0.2.1"), None);
        assert_eq!(
            canonical_network(" 192.0.2.5/24 "),
            Some("192.0.2.0/24".to_string())
        );
        assert_eq!(
            canonical_network("2001:db8::1/32"),
            Some("2001:db8::/32".to_string())
        );
    }
}
