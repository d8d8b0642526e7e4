//! Store primitives shared by every whois query

use crate::database::{AsnRecord, MntByOwner, NetworkRecord, RpslObject, WhoisDatabase};
use anyhow::Result;

/// Read-only view of the whois store
pub struct WhoisLookup<'a> {
    db: &'a WhoisDatabase,
}

impl<'a> WhoisLookup<'a> {
    pub fn new(db: &'a WhoisDatabase) -> Self {
        Self { db }
    }

    /// Block of one object
    pub fn object(&self, key: &str, value: &str) -> Result<Option<String>> {
        self.db.rpsl().get_block(key, value)
    }

    /// Objects of any of the given types sharing a primary value
    pub fn objects(&self, keys: &[&str], value: &str) -> Result<Vec<RpslObject>> {
        self.db.rpsl().find(keys, value)
    }

    /// Delegation record of an ASN
    pub fn asn(&self, asn: u32) -> Result<Option<AsnRecord>> {
        self.db.allocations().find_asn(asn)
    }

    /// ASNs held by the owner of an allocation
    pub fn asns_of(&self, network: &NetworkRecord) -> Result<Vec<AsnRecord>> {
        self.db
            .allocations()
            .asns_by_owner(&network.coordinator, &network.identifier)
    }

    pub fn origins_of_route(&self, route: &str) -> Result<Vec<String>> {
        self.db.rpsl().origins_for_route(route)
    }

    pub fn routes_of_origin(&self, origin: &str) -> Result<Vec<String>> {
        self.db.rpsl().routes_for_origin(origin)
    }

    /// Objects of the given types maintained by `mntby`
    pub fn maintained_by(&self, mntby: &str, keys: &[&str]) -> Result<Vec<MntByOwner>> {
        self.db.rpsl().owners_for_mntby(mntby, keys)
    }

    /// Narrowest allocation containing an address or prefix
    pub fn allocation(&self, address: &str) -> Result<Option<NetworkRecord>> {
        self.db.allocations().narrowest_for_address(address)
    }

    /// Per-address geolocation labels
    pub fn address_geo(&self, bound: &str) -> Result<Option<String>> {
        self.db.geo().get(bound)
    }
}
