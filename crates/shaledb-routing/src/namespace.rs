//! Namespace identity: tenant-qualified database and collection names.
//!
//! A [`NamespaceIdentity`] is stored as a single packed buffer so that it is
//! cheap to clone, hash and compare: one discriminator byte (tenant-present
//! flag plus the database-name length), an optional 12-byte tenant id, then
//! the raw `db.coll` bytes. The buffer is immutable after construction.

use std::cmp::Ordering;
use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RoutingError;

/// Maximum length of the combined `db.coll` string, in bytes.
pub const MAX_NAMESPACE_LEN: usize = 255;

/// Maximum length of a database name, in bytes.
pub const MAX_DB_NAME_LEN: usize = 63;

/// Characters that may not appear in a database name.
const FORBIDDEN_DB_CHARS: &[char] = &['/', '\\', '.', '"', '$', ' ', '\0'];

const TENANT_FLAG: u8 = 0x80;
const DB_LEN_MASK: u8 = 0x7f;
const TENANT_ID_LEN: usize = 12;

/// A 12-byte tenant identifier qualifying a namespace in multi-tenant
/// deployments.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenantId([u8; TENANT_ID_LEN]);

impl TenantId {
    /// Creates a tenant id from its raw 12 bytes.
    pub fn from_bytes(bytes: [u8; TENANT_ID_LEN]) -> Self {
        TenantId(bytes)
    }

    /// Parses a tenant id from its 24-character lowercase hex form.
    pub fn from_hex(s: &str) -> Result<Self, RoutingError> {
        if s.len() != TENANT_ID_LEN * 2 {
            return Err(RoutingError::InvalidTenantId(s.to_string()));
        }
        let mut bytes = [0u8; TENANT_ID_LEN];
        for (i, chunk) in s.as_bytes().chunks_exact(2).enumerate() {
            let pair = std::str::from_utf8(chunk)
                .map_err(|_| RoutingError::InvalidTenantId(s.to_string()))?;
            bytes[i] = u8::from_str_radix(pair, 16)
                .map_err(|_| RoutingError::InvalidTenantId(s.to_string()))?;
        }
        Ok(TenantId(bytes))
    }

    /// Returns the raw bytes of this tenant id.
    pub fn as_bytes(&self) -> &[u8; TENANT_ID_LEN] {
        &self.0
    }

    /// Returns the 24-character lowercase hex form.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(TENANT_ID_LEN * 2);
        for b in self.0 {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.to_hex())
    }
}

/// Returns true if `db` is an allowed database name.
pub fn valid_db_name(db: &str) -> bool {
    !db.is_empty() && db.len() <= MAX_DB_NAME_LEN && !db.contains(FORBIDDEN_DB_CHARS)
}

/// Returns true if `coll` is an allowed collection name component.
pub fn valid_coll_name(coll: &str) -> bool {
    !coll.is_empty() && !coll.starts_with('.') && !coll.contains('\0')
}

/// Identity of a logical database or collection: optional tenant id,
/// database name and (for collection namespaces) collection name.
///
/// Total ordering: tenant id first (present sorts after absent), then the
/// raw encoded bytes. The [`NamespaceIdentity::empty`] sentinel compares as
/// the minimum value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct NamespaceIdentity {
    data: Vec<u8>,
}

impl NamespaceIdentity {
    /// The empty sentinel: no tenant, no database, no collection.
    pub fn empty() -> Self {
        NamespaceIdentity { data: vec![0] }
    }

    /// Creates a database-only namespace.
    pub fn database(tenant: Option<TenantId>, db: &str) -> Result<Self, RoutingError> {
        if !valid_db_name(db) {
            return Err(RoutingError::InvalidNamespace(format!(
                "bad database name '{}'",
                db
            )));
        }
        Ok(Self::pack(tenant, db, None))
    }

    /// Creates a collection namespace from its components.
    pub fn new(tenant: Option<TenantId>, db: &str, coll: &str) -> Result<Self, RoutingError> {
        if !valid_db_name(db) {
            return Err(RoutingError::InvalidNamespace(format!(
                "bad database name '{}'",
                db
            )));
        }
        if !valid_coll_name(coll) {
            return Err(RoutingError::InvalidNamespace(format!(
                "bad collection name '{}'",
                coll
            )));
        }
        if db.len() + 1 + coll.len() > MAX_NAMESPACE_LEN {
            return Err(RoutingError::InvalidNamespace(format!(
                "namespace '{}.{}' exceeds {} bytes",
                db, coll, MAX_NAMESPACE_LEN
            )));
        }
        Ok(Self::pack(tenant, db, Some(coll)))
    }

    /// Parses a combined `db.coll` (or bare `db`) string.
    pub fn parse_full(tenant: Option<TenantId>, ns: &str) -> Result<Self, RoutingError> {
        match ns.split_once('.') {
            Some((db, coll)) => Self::new(tenant, db, coll),
            None => Self::database(tenant, ns),
        }
    }

    /// Parses the tenant-prefixed string form produced by
    /// [`NamespaceIdentity::full_name_with_tenant`]: `<24-hex>_db.coll`
    /// when a tenant is present, plain `db.coll` otherwise.
    pub fn parse_with_tenant(s: &str) -> Result<Self, RoutingError> {
        if s.len() > TENANT_ID_LEN * 2 && s.as_bytes()[TENANT_ID_LEN * 2] == b'_' {
            if let Ok(tenant) = TenantId::from_hex(&s[..TENANT_ID_LEN * 2]) {
                return Self::parse_full(Some(tenant), &s[TENANT_ID_LEN * 2 + 1..]);
            }
        }
        Self::parse_full(None, s)
    }

    /// Returns true iff `ns` names a valid collection namespace: the
    /// database part is non-empty, within bounds and free of forbidden
    /// characters, and the collection part is non-empty.
    pub fn is_valid_full_name(ns: &str) -> bool {
        match ns.split_once('.') {
            Some((db, coll)) => valid_db_name(db) && !coll.is_empty(),
            None => false,
        }
    }

    fn pack(tenant: Option<TenantId>, db: &str, coll: Option<&str>) -> Self {
        let tenant_len = if tenant.is_some() { TENANT_ID_LEN } else { 0 };
        let ns_len = db.len() + coll.map_or(0, |c| 1 + c.len());
        let mut data = Vec::with_capacity(1 + tenant_len + ns_len);
        let mut disc = db.len() as u8 & DB_LEN_MASK;
        if tenant.is_some() {
            disc |= TENANT_FLAG;
        }
        data.push(disc);
        if let Some(t) = tenant {
            data.extend_from_slice(t.as_bytes());
        }
        data.extend_from_slice(db.as_bytes());
        if let Some(c) = coll {
            data.push(b'.');
            data.extend_from_slice(c.as_bytes());
        }
        NamespaceIdentity { data }
    }

    fn has_tenant(&self) -> bool {
        self.data[0] & TENANT_FLAG != 0
    }

    fn db_len(&self) -> usize {
        (self.data[0] & DB_LEN_MASK) as usize
    }

    fn ns_offset(&self) -> usize {
        1 + if self.has_tenant() { TENANT_ID_LEN } else { 0 }
    }

    /// Returns true for the empty sentinel.
    pub fn is_empty(&self) -> bool {
        self.data.len() == 1 && self.data[0] == 0
    }

    /// Returns true if this identity names a database only.
    pub fn is_db_only(&self) -> bool {
        self.ns_offset() + self.db_len() == self.data.len()
    }

    /// Returns the tenant id, if present.
    pub fn tenant_id(&self) -> Option<TenantId> {
        if !self.has_tenant() {
            return None;
        }
        let mut bytes = [0u8; TENANT_ID_LEN];
        bytes.copy_from_slice(&self.data[1..1 + TENANT_ID_LEN]);
        Some(TenantId(bytes))
    }

    /// Returns the database name component.
    pub fn db_name(&self) -> &str {
        let start = self.ns_offset();
        std::str::from_utf8(&self.data[start..start + self.db_len()])
            .expect("namespace buffer holds utf-8")
    }

    /// Returns the collection name component, or `""` for a database-only
    /// namespace.
    pub fn coll_name(&self) -> &str {
        let start = self.ns_offset() + self.db_len() + 1;
        if start > self.data.len() {
            return "";
        }
        std::str::from_utf8(&self.data[start..]).expect("namespace buffer holds utf-8")
    }

    /// Returns the `db.coll` string without any tenant prefix.
    pub fn full_name(&self) -> &str {
        std::str::from_utf8(&self.data[self.ns_offset()..]).expect("namespace buffer holds utf-8")
    }

    /// Returns the string form with the tenant id serialized as a prefix:
    /// `<24-hex>_db.coll`, or plain `db.coll` when no tenant is present.
    pub fn full_name_with_tenant(&self) -> String {
        match self.tenant_id() {
            Some(t) => format!("{}_{}", t.to_hex(), self.full_name()),
            None => self.full_name().to_string(),
        }
    }

    /// Returns the database-only identity for this namespace, preserving
    /// the tenant id.
    pub fn db_identity(&self) -> NamespaceIdentity {
        if self.is_db_only() {
            return self.clone();
        }
        Self::pack(self.tenant_id(), self.db_name(), None)
    }

    /// Returns a sibling collection namespace `db.<coll><suffix>` under the
    /// same tenant and database.
    pub fn with_collection_suffix(&self, suffix: &str) -> Result<NamespaceIdentity, RoutingError> {
        let coll = format!("{}{}", self.coll_name(), suffix);
        Self::new(self.tenant_id(), self.db_name(), &coll)
    }
}

impl Ord for NamespaceIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.has_tenant(), other.has_tenant()) {
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            _ => self.data[1..].cmp(&other.data[1..]),
        }
    }
}

impl PartialOrd for NamespaceIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NamespaceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name_with_tenant())
    }
}

impl fmt::Debug for NamespaceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NamespaceIdentity({})", self)
    }
}

impl Serialize for NamespaceIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_empty() {
            serializer.serialize_str("")
        } else {
            serializer.serialize_str(&self.full_name_with_tenant())
        }
    }
}

struct NamespaceVisitor;

impl<'de> Visitor<'de> for NamespaceVisitor {
    type Value = NamespaceIdentity;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a namespace string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<NamespaceIdentity, E> {
        if v.is_empty() {
            return Ok(NamespaceIdentity::empty());
        }
        NamespaceIdentity::parse_with_tenant(v).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for NamespaceIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(NamespaceVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ns(db: &str, coll: &str) -> NamespaceIdentity {
        NamespaceIdentity::new(None, db, coll).unwrap()
    }

    #[test]
    fn test_components_round_trip() {
        let id = ns("inventory", "orders");
        assert_eq!(id.db_name(), "inventory");
        assert_eq!(id.coll_name(), "orders");
        assert_eq!(id.full_name(), "inventory.orders");
        assert!(id.tenant_id().is_none());
        assert!(!id.is_db_only());
    }

    #[test]
    fn test_collection_name_may_contain_dots() {
        let id = NamespaceIdentity::parse_full(None, "db.system.views").unwrap();
        assert_eq!(id.db_name(), "db");
        assert_eq!(id.coll_name(), "system.views");
    }

    #[test]
    fn test_tenant_round_trip_through_both_string_forms() {
        let tenant = TenantId::from_hex("0123456789abcdef01234567").unwrap();
        let id = NamespaceIdentity::new(Some(tenant), "foo", "bar").unwrap();

        assert_eq!(id.full_name(), "foo.bar");
        let with_tenant = id.full_name_with_tenant();
        assert_eq!(with_tenant, "0123456789abcdef01234567_foo.bar");

        let reparsed = NamespaceIdentity::parse_with_tenant(&with_tenant).unwrap();
        assert_eq!(reparsed, id);
        assert_eq!(reparsed.tenant_id(), Some(tenant));

        let without = NamespaceIdentity::parse_full(Some(tenant), id.full_name()).unwrap();
        assert_eq!(without.tenant_id(), Some(tenant));
        assert_eq!(without, id);
    }

    #[test]
    fn test_tenant_hex_round_trip() {
        let tenant = TenantId::from_bytes([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        let hex = tenant.to_hex();
        assert_eq!(hex.len(), 24);
        assert_eq!(TenantId::from_hex(&hex).unwrap(), tenant);
        assert!(TenantId::from_hex("zz23456789abcdef01234567").is_err());
        assert!(TenantId::from_hex("0123").is_err());
    }

    #[test]
    fn test_db_only_namespace() {
        let id = NamespaceIdentity::database(None, "accounts").unwrap();
        assert!(id.is_db_only());
        assert_eq!(id.coll_name(), "");
        assert_eq!(id.full_name(), "accounts");
    }

    #[test]
    fn test_invalid_database_names() {
        for bad in ["", "a/b", "a\\b", "a.b", "a\"b", "a$b", "a b", "a\0b"] {
            assert!(
                NamespaceIdentity::database(None, bad).is_err(),
                "db name {:?} should be rejected",
                bad
            );
        }
        let too_long = "d".repeat(MAX_DB_NAME_LEN + 1);
        assert!(NamespaceIdentity::database(None, &too_long).is_err());
        let at_limit = "d".repeat(MAX_DB_NAME_LEN);
        assert!(NamespaceIdentity::database(None, &at_limit).is_ok());
    }

    #[test]
    fn test_invalid_collection_names() {
        assert!(NamespaceIdentity::new(None, "db", "").is_err());
        assert!(NamespaceIdentity::new(None, "db", ".hidden").is_err());
        assert!(NamespaceIdentity::new(None, "db", "a\0b").is_err());
        let too_long = "c".repeat(MAX_NAMESPACE_LEN);
        assert!(NamespaceIdentity::new(None, "db", &too_long).is_err());
    }

    #[test]
    fn test_is_valid_full_name() {
        assert!(NamespaceIdentity::is_valid_full_name("db.coll"));
        assert!(NamespaceIdentity::is_valid_full_name("db.system.views"));
        assert!(!NamespaceIdentity::is_valid_full_name("db"));
        assert!(!NamespaceIdentity::is_valid_full_name("db."));
        assert!(!NamespaceIdentity::is_valid_full_name(".coll"));
        assert!(!NamespaceIdentity::is_valid_full_name("a b.coll"));
        assert!(!NamespaceIdentity::is_valid_full_name(""));
    }

    #[test]
    fn test_empty_sentinel_is_minimum() {
        let empty = NamespaceIdentity::empty();
        assert!(empty.is_empty());
        assert!(empty < ns("a", "a"));
        assert!(empty < NamespaceIdentity::database(None, "a").unwrap());
        assert_eq!(empty, NamespaceIdentity::empty());
    }

    #[test]
    fn test_ordering_tenant_present_sorts_after_absent() {
        let tenant = TenantId::from_bytes([0; 12]);
        let plain = ns("zzz", "zzz");
        let tenanted = NamespaceIdentity::new(Some(tenant), "aaa", "aaa").unwrap();
        assert!(plain < tenanted);

        let t1 = NamespaceIdentity::new(Some(TenantId::from_bytes([1; 12])), "db", "c").unwrap();
        let t2 = NamespaceIdentity::new(Some(TenantId::from_bytes([2; 12])), "db", "c").unwrap();
        assert!(t1 < t2);
    }

    #[test]
    fn test_ordering_by_name_bytes() {
        assert!(ns("a", "b") < ns("a", "c"));
        assert!(ns("a", "z") < ns("b", "a"));
    }

    #[test]
    fn test_db_identity_strips_collection() {
        let tenant = TenantId::from_bytes([7; 12]);
        let id = NamespaceIdentity::new(Some(tenant), "db", "coll").unwrap();
        let db = id.db_identity();
        assert!(db.is_db_only());
        assert_eq!(db.db_name(), "db");
        assert_eq!(db.tenant_id(), Some(tenant));
    }

    #[test]
    fn test_with_collection_suffix() {
        let id = ns("db", "payments");
        let aux = id.with_collection_suffix(".state").unwrap();
        assert_eq!(aux.full_name(), "db.payments.state");
    }

    #[test]
    fn test_serde_string_round_trip() {
        let tenant = TenantId::from_bytes([3; 12]);
        for id in [
            ns("db", "coll"),
            NamespaceIdentity::new(Some(tenant), "db", "coll").unwrap(),
            NamespaceIdentity::database(None, "db").unwrap(),
            NamespaceIdentity::empty(),
        ] {
            let json = serde_json::to_string(&id).unwrap();
            let back: NamespaceIdentity = serde_json::from_str(&json).unwrap();
            assert_eq!(back, id);
        }
    }

    proptest! {
        #[test]
        fn prop_well_formed_names_accepted(
            db in "[a-zA-Z0-9_-]{1,63}",
            coll in "[a-zA-Z0-9_]{1,50}",
        ) {
            let full = format!("{}.{}", db, coll);
            prop_assert!(NamespaceIdentity::is_valid_full_name(&full));
            let id = NamespaceIdentity::parse_full(None, &full).unwrap();
            prop_assert_eq!(id.db_name(), db.as_str());
            prop_assert_eq!(id.coll_name(), coll.as_str());
        }

        #[test]
        fn prop_forbidden_db_char_rejected(
            db in "[a-z]{1,20}",
            coll in "[a-z]{1,20}",
            bad in proptest::sample::select(vec!['/', '\\', '"', '$', ' ']),
            pos in 0usize..20,
        ) {
            let mut db = db;
            let at = pos.min(db.len());
            db.insert(at, bad);
            let full = format!("{}.{}", db, coll);
            prop_assert!(!NamespaceIdentity::is_valid_full_name(&full));
        }
    }
}
