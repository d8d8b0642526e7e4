//! Whois lens
//!
//! Composes whois-style answers from the local mirror. Every answer is a
//! list of sections, each either a stored RPSL block or a block synthesized
//! from delegation data; rendered, each section is followed by one blank
//! line.
//!
//! ```rust,ignore
//! use whoislite::database::WhoisDatabase;
//! use whoislite::lens::whois::{WhoisLens, WhoisQueryArgs, WhoisQueryType};
//!
//! let db = WhoisDatabase::open_in_dir("~/.whoislite")?;
//! let lens = WhoisLens::new(&db);
//! let answer = lens.query(&WhoisQueryArgs::new(WhoisQueryType::AutNum, "AS13335"))?;
//! print!("{}", answer);
//! ```

pub mod args;
mod lookup;

pub use args::{WhoisQueryArgs, WhoisQueryType};
pub use lookup::WhoisLookup;

use crate::address::{as_key, canonical_network, ip_to_range_bound, parse_address, parse_as_key};
use crate::database::{AsnRecord, NetworkRecord, WhoisDatabase};
use anyhow::{anyhow, Result};
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Attribute names are padded to this width in synthesized blocks
const ATTRIBUTE_WIDTH: usize = 16;

const ROUTE_TYPES: [&str; 2] = ["route", "route6"];

/// One block of a whois answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WhoisSection {
    /// Object type of a stored block, or the name of a synthesized one
    pub object: String,
    pub synthesized: bool,
    /// Newline-terminated attribute lines
    pub text: String,
}

impl WhoisSection {
    fn stored(object: &str, text: String) -> Self {
        Self {
            object: object.to_string(),
            synthesized: false,
            text,
        }
    }

    fn synthesized(object: &str, attributes: &[(&str, &str)]) -> Self {
        let text = attributes
            .iter()
            .map(|(name, value)| attribute_line(name, value))
            .collect();
        Self {
            object: object.to_string(),
            synthesized: true,
            text,
        }
    }
}

/// A composed whois answer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WhoisAnswer {
    pub sections: Vec<WhoisSection>,
}

impl WhoisAnswer {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    fn push(&mut self, section: WhoisSection) {
        self.sections.push(section);
    }

    fn extend(&mut self, other: WhoisAnswer) {
        self.sections.extend(other.sections);
    }
}

impl fmt::Display for WhoisAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for section in &self.sections {
            write!(f, "{}", section.text)?;
            if !section.text.ends_with('\n') {
                writeln!(f)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// `name:` padded to the attribute column, then the value
fn attribute_line(name: &str, value: &str) -> String {
    format!("{:<width$}{}\n", format!("{}:", name), value, width = ATTRIBUTE_WIDTH)
}

/// Whois lens over a [`WhoisDatabase`]
pub struct WhoisLens<'a> {
    lookup: WhoisLookup<'a>,
}

impl<'a> WhoisLens<'a> {
    pub fn new(db: &'a WhoisDatabase) -> Self {
        Self {
            lookup: WhoisLookup::new(db),
        }
    }

    /// Run the query described by `args`
    pub fn query(&self, args: &WhoisQueryArgs) -> Result<WhoisAnswer> {
        let key = args.key.trim();
        if key.is_empty() {
            return Err(anyhow!("Empty {} query", args.query_type));
        }
        debug!("whois {} {}", args.query_type, key);

        match args.query_type {
            WhoisQueryType::AutNum => self.aut_num(key),
            WhoisQueryType::AsSet => self.as_set(key),
            WhoisQueryType::MntBy => self.mnt_by(key),
            WhoisQueryType::Mntner => self.mntner(key),
            WhoisQueryType::RouteOrigin => self.route_origin(key),
            WhoisQueryType::NetworkOrigin => self.network_origin(key),
            WhoisQueryType::Organisation => self.organisation(key),
            WhoisQueryType::Allocation => self.allocation(key),
        }
    }

    /// aut-num block, ASN metadata, then every referenced organisation
    ///
    /// Empty when there is no aut-num object; [`Self::organisation`] gives
    /// the metadata alone.
    pub fn aut_num(&self, as_or_num: &str) -> Result<WhoisAnswer> {
        let asn = parse_as_key(as_or_num)?;
        let key = as_key(asn);
        let mut answer = WhoisAnswer::default();

        let Some(block) = self.lookup.object("aut-num", &key)? else {
            debug!("no aut-num object for {}", key);
            return Ok(answer);
        };
        answer.push(WhoisSection::stored("aut-num", block.clone()));
        if let Some(record) = self.lookup.asn(asn)? {
            answer.push(asn_section(&record));
        }
        for org in block_attributes(&block, "org") {
            match self.lookup.object("organisation", org)? {
                Some(text) => answer.push(WhoisSection::stored("organisation", text)),
                None => debug!("organisation {} of {} not in the mirror", org, key),
            }
        }
        Ok(answer)
    }

    /// Every as-set block with this name
    pub fn as_set(&self, name: &str) -> Result<WhoisAnswer> {
        self.stored(&["as-set"], name)
    }

    /// aut-num and as-set blocks maintained by `mntner`, and nothing else
    pub fn mnt_by(&self, mntner: &str) -> Result<WhoisAnswer> {
        let mut answer = WhoisAnswer::default();
        for owner in self.lookup.maintained_by(mntner, &["aut-num", "as-set"])? {
            if let Some(text) = self.lookup.object(&owner.key, &owner.value)? {
                answer.push(WhoisSection::stored(&owner.key, text));
            }
        }
        Ok(answer)
    }

    /// mntner block followed by the role blocks it maintains
    pub fn mntner(&self, id: &str) -> Result<WhoisAnswer> {
        let mut answer = self.stored(&["mntner"], id)?;
        for owner in self.lookup.maintained_by(id, &["role"])? {
            if let Some(text) = self.lookup.object(&owner.key, &owner.value)? {
                answer.push(WhoisSection::stored(&owner.key, text));
            }
        }
        Ok(answer)
    }

    /// route/route6 blocks whose origin is the ASN
    pub fn route_origin(&self, as_or_num: &str) -> Result<WhoisAnswer> {
        let origin = as_key(parse_as_key(as_or_num)?);
        let mut answer = WhoisAnswer::default();
        for route in self.lookup.routes_of_origin(&origin)? {
            answer.extend(self.stored(&ROUTE_TYPES, &route)?);
        }
        Ok(answer)
    }

    /// Route object of a prefix and its origins' aut-num answers
    ///
    /// When no route object matches, the narrowest allocation containing the
    /// input is tried once instead.
    pub fn network_origin(&self, prefix_or_address: &str) -> Result<WhoisAnswer> {
        let network = canonical_network(prefix_or_address)
            .unwrap_or_else(|| prefix_or_address.trim().to_string());
        let answer = self.route_with_origins(&network)?;
        if !answer.is_empty() {
            return Ok(answer);
        }

        match self.lookup.allocation(prefix_or_address)? {
            Some(allocation) if allocation.network != network => {
                debug!("no route object for {}, trying {}", network, allocation.network);
                self.route_with_origins(&allocation.network)
            }
            _ => Ok(answer),
        }
    }

    /// Synthesized ASN metadata only
    pub fn organisation(&self, as_or_num: &str) -> Result<WhoisAnswer> {
        let asn = parse_as_key(as_or_num)?;
        let mut answer = WhoisAnswer::default();
        if let Some(record) = self.lookup.asn(asn)? {
            answer.push(asn_section(&record));
        }
        Ok(answer)
    }

    /// Delegation record containing an address, its holder's ASNs with their
    /// geolocation labels, and the address's own labels
    pub fn allocation(&self, address: &str) -> Result<WhoisAnswer> {
        let addr = parse_address(address)?;
        let mut answer = WhoisAnswer::default();

        if let Some(network) = self.lookup.allocation(address)? {
            answer.push(network_section(&network));
            for record in self.lookup.asns_of(&network)? {
                let mut section = asn_section(&record);
                for label in record.geo.split('|').filter(|l| !l.is_empty()) {
                    section.text.push_str(&attribute_line("geo", label));
                }
                answer.push(section);
            }
        }

        if let Some(labels) = self.lookup.address_geo(&ip_to_range_bound(addr))? {
            let address_text = addr.to_string();
            let mut attributes = vec![("address", address_text.as_str())];
            attributes.extend(labels.split('|').map(|label| ("geo", label)));
            answer.push(WhoisSection::synthesized("address", &attributes));
        }
        Ok(answer)
    }

    fn stored(&self, keys: &[&str], value: &str) -> Result<WhoisAnswer> {
        let mut answer = WhoisAnswer::default();
        for object in self.lookup.objects(keys, value)? {
            answer.push(WhoisSection::stored(&object.key, object.block));
        }
        Ok(answer)
    }

    fn route_with_origins(&self, network: &str) -> Result<WhoisAnswer> {
        let mut answer = self.stored(&ROUTE_TYPES, network)?;
        if answer.is_empty() {
            return Ok(answer);
        }
        for origin in self.lookup.origins_of_route(network)? {
            match self.aut_num(&origin) {
                Ok(aut_num) => answer.extend(aut_num),
                Err(e) => warn!("skipping origin '{}' of {}: {}", origin, network, e),
            }
        }
        Ok(answer)
    }
}

/// `as-num`/`country`/`as-name` block of a delegation record
fn asn_section(record: &AsnRecord) -> WhoisSection {
    let as_num = as_key(record.asn);
    WhoisSection::synthesized(
        "as-num",
        &[
            ("as-num", as_num.as_str()),
            ("country", record.country.as_str()),
            ("as-name", record.name.as_deref().unwrap_or_default()),
        ],
    )
}

fn network_section(network: &NetworkRecord) -> WhoisSection {
    WhoisSection::synthesized(
        "network",
        &[
            ("network", network.network.as_str()),
            ("coordinator", network.coordinator.as_str()),
            ("country", network.country.as_str()),
            ("date", network.date.as_str()),
            ("identifier", network.identifier.as_str()),
        ],
    )
}

/// Trimmed values of every `name:` attribute of a block
fn block_attributes<'b>(block: &'b str, name: &str) -> Vec<&'b str> {
    block
        .lines()
        .filter_map(|line| {
            let (attr, value) = line.split_once(':')?;
            let value = value.trim();
            (attr.trim().eq_ignore_ascii_case(name) && !value.is_empty()).then_some(value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::testing::{sync_source_text, sync_text};
    use crate::ingest::{DelegationIngestor, FeedIngestor, GeoIngestor, RpslIngestor};

    const DELEGATIONS: &str = "\
ripencc|UA|asn|64496|1|20100101|allocated|org-a
ripencc|UA|asn|64497|1|20100101|allocated|org-b
ripencc|UA|ipv4|192.0.2.0|256|20100101|allocated|org-a
ripencc|UA|ipv4|198.51.100.0|256|20100101|allocated|org-b
ripencc|UA|ipv6|2001:db8::|32|20100101|allocated|org-a
";

    const DUMP: &str = "\
aut-num:        AS64496
as-name:        FOO-AS
org:            ORG-FOO1-RIPE
mnt-by:         MAINT-FOO

aut-num:        AS64497
as-name:        BAR-AS
mnt-by:         MAINT-BAR

as-set:         AS-FOO
members:        AS64496
mnt-by:         MAINT-FOO

organisation:   ORG-FOO1-RIPE
org-name:       Foo Networks

mntner:         MAINT-FOO
descr:          Foo maintainer

role:           Foo NOC
nic-hdl:        FOO1-RIPE
mnt-by:         MAINT-FOO

route:          192.0.2.0/24
origin:         AS64496

route6:         2001:db8::/32
origin:         AS64496
origin:         AS64497
";

    fn setup() -> WhoisDatabase {
        let db = WhoisDatabase::open_in_memory().unwrap();
        sync_text(&db, &mut DelegationIngestor::new(), DELEGATIONS);
        sync_text(&db, &mut RpslIngestor::new(), DUMP);
        db.allocations()
            .update_asn_name(64496, "FOO-AS Foo Networks", "UA")
            .unwrap();
        db
    }

    fn objects(answer: &WhoisAnswer) -> Vec<&str> {
        answer.sections.iter().map(|s| s.object.as_str()).collect()
    }

    #[test]
    fn test_attribute_line() {
        assert_eq!(attribute_line("as-num", "AS1"), "as-num:         AS1\n");
        assert_eq!(attribute_line("country", "UA"), "country:        UA\n");
    }

    #[test]
    fn test_aut_num() {
        let db = setup();
        let lens = WhoisLens::new(&db);

        for key in ["AS64496", "as64496", "64496"] {
            let answer = lens.aut_num(key).unwrap();
            assert_eq!(objects(&answer), vec!["aut-num", "as-num", "organisation"]);
        }

        let text = lens.aut_num("64496").unwrap().to_string();
        assert!(text.starts_with("aut-num:        AS64496\n"));
        assert!(text.contains(
            "\n\nas-num:         AS64496\ncountry:        UA\nas-name:        FOO-AS Foo Networks\n\n"
        ));
        assert!(text.ends_with("org-name:       Foo Networks\n\n"));

        assert!(lens.aut_num("ASX").is_err());
        assert!(lens.aut_num("65000").unwrap().is_empty());
    }

    #[test]
    fn test_aut_num_needs_an_aut_num_object() {
        let db = setup();
        sync_text(
            &db,
            &mut DelegationIngestor::new(),
            "arin|US|asn|64498|1|20100101|allocated|org-c\n",
        );
        let lens = WhoisLens::new(&db);

        // delegated, but nothing in the RPSL dumps
        assert!(lens.aut_num("AS64498").unwrap().is_empty());
        let answer = lens.organisation("AS64498").unwrap();
        assert_eq!(objects(&answer), vec!["as-num"]);
        assert!(answer.to_string().starts_with("as-num:         AS64498\ncountry:        US\n"));
    }

    #[test]
    fn test_mnt_by_returns_only_aut_num_and_as_set() {
        let db = setup();
        let lens = WhoisLens::new(&db);

        let answer = lens.mnt_by("MAINT-FOO").unwrap();
        assert_eq!(objects(&answer), vec!["as-set", "aut-num"]);
        assert!(answer.sections[0].text.starts_with("as-set:         AS-FOO"));
        assert!(answer.sections[1].text.starts_with("aut-num:        AS64496"));
        // the role maintained by MAINT-FOO is not part of the answer
        assert!(!answer.to_string().contains("Foo NOC"));
    }

    #[test]
    fn test_mntner_with_roles() {
        let db = setup();
        let answer = WhoisLens::new(&db).mntner("maint-foo").unwrap();
        assert_eq!(objects(&answer), vec!["mntner", "role"]);
    }

    #[test]
    fn test_as_set_and_organisation() {
        let db = setup();
        let lens = WhoisLens::new(&db);
        assert_eq!(objects(&lens.as_set("as-foo").unwrap()), vec!["as-set"]);

        let answer = lens.organisation("AS64497").unwrap();
        assert_eq!(
            answer.to_string(),
            "as-num:         AS64497\ncountry:        UA\nas-name:        \n\n"
        );
    }

    #[test]
    fn test_route_origin() {
        let db = setup();
        let lens = WhoisLens::new(&db);

        let answer = lens.route_origin("64496").unwrap();
        assert_eq!(objects(&answer), vec!["route", "route6"]);
        let answer = lens.route_origin("AS64497").unwrap();
        assert_eq!(objects(&answer), vec!["route6"]);
    }

    #[test]
    fn test_network_origin() {
        let db = setup();
        let lens = WhoisLens::new(&db);

        let answer = lens.network_origin("2001:0db8::/32").unwrap();
        assert_eq!(
            objects(&answer),
            vec!["route6", "aut-num", "as-num", "organisation", "aut-num", "as-num"]
        );

        // an address inside an allocation falls back to its network
        let answer = lens.network_origin("192.0.2.77").unwrap();
        assert_eq!(answer.sections[0].object, "route");
        assert!(answer.sections[0].text.starts_with("route:          192.0.2.0/24"));

        // allocated but no route object
        assert!(lens.network_origin("198.51.100.1").unwrap().is_empty());
        assert!(lens.network_origin("203.0.113.1").unwrap().is_empty());
    }

    #[test]
    fn test_network_origin_clears_host_bits() {
        let db = setup();
        // a route with no matching allocation, from a second dump
        sync_source_text(
            &db,
            &mut RpslIngestor::new(),
            "mem://radb.db",
            "route:          203.0.113.0/24\norigin:         AS64497\n",
        );
        let lens = WhoisLens::new(&db);

        let answer = lens.network_origin("203.0.113.9/24").unwrap();
        assert_eq!(objects(&answer), vec!["route", "aut-num", "as-num"]);
        assert!(answer.sections[0].text.starts_with("route:          203.0.113.0/24"));
    }

    #[test]
    fn test_allocation() {
        let db = setup();
        let mut geo = GeoIngestor::new();
        {
            let tx = db.conn().transaction().unwrap();
            geo.begin_pass(&tx).unwrap();
            tx.commit().unwrap();
        }
        sync_text(&db, &mut geo, "192.0.2.10,x,Kyiv,Kyiv City,Ukraine,UA\n");

        let lens = WhoisLens::new(&db);
        let answer = lens.allocation("192.0.2.10").unwrap();
        assert_eq!(objects(&answer), vec!["network", "as-num", "address"]);
        let text = answer.to_string();
        assert!(text.starts_with("network:        192.0.2.0/24\ncoordinator:    ripencc\n"));
        assert!(text.contains("geo:            Kyiv,Kyiv City,Ukraine,UA\n\naddress:        192.0.2.10\n"));

        let answer = lens.allocation("192.0.2.11").unwrap();
        assert_eq!(objects(&answer), vec!["network", "as-num"]);
        assert!(lens.allocation("not an address").is_err());
    }

    #[test]
    fn test_query_dispatch() {
        let db = setup();
        let lens = WhoisLens::new(&db);
        let answer = lens
            .query(&WhoisQueryArgs::new(WhoisQueryType::AsSet, "AS-FOO"))
            .unwrap();
        assert_eq!(objects(&answer), vec!["as-set"]);
        assert!(lens
            .query(&WhoisQueryArgs::new(WhoisQueryType::Mntner, "  "))
            .is_err());
    }
}
