//! Content-derived identifiers for entities and relations.
//!
//! Ids are `{prefix}-{hash}` where the hash is the first 8 bytes of a
//! SHA-256 digest encoded as 13 base36 characters. The digest input is the
//! logical identity of the record, so ingesting the same entity or edge twice
//! always yields the same id.
//!
//! | Record | Prefix | Digest input |
//! |--------|--------|--------------|
//! | Entity | `ent` | `domain`, `identifier`, `version` (empty when unversioned) |
//! | Relation | `rel` | `source`, `target`, `relation_type` |
//!
//! Each part is written as `{byte_len}:{part}` so free-text fields containing
//! separators cannot make two identities share a digest input.

use sha2::{Digest, Sha256};

use crate::types::{EntityId, RelationId, RelationType};

const BASE36_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Number of base36 digits needed to hold any `u64`.
pub const HASH_LENGTH: usize = 13;

/// Prefix for entity ids.
pub const ENTITY_PREFIX: &str = "ent";

/// Prefix for relation ids.
pub const RELATION_PREFIX: &str = "rel";

/// Derive the id of an entity from its identity triple.
#[must_use]
pub fn entity_id(domain: &str, identifier: &str, version: Option<&str>) -> EntityId {
    let content = identity_key(&[domain, identifier, version.unwrap_or("")]);
    EntityId::from(format!("{ENTITY_PREFIX}-{}", hash_content(&content)))
}

/// Derive the id of an edge from its endpoints and type.
#[must_use]
pub fn relation_id(source: &EntityId, target: &EntityId, relation_type: RelationType) -> RelationId {
    let content = identity_key(&[source.as_str(), target.as_str(), relation_type.as_str()]);
    RelationId::from(format!("{RELATION_PREFIX}-{}", hash_content(&content)))
}

/// Check that a string has the shape of a keystone id with the given prefix.
#[must_use]
pub fn is_valid_id(id: &str, prefix: &str) -> bool {
    let Some(hash) = id
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('-'))
    else {
        return false;
    };

    hash.len() == HASH_LENGTH && hash.bytes().all(|b| BASE36_CHARS.contains(&b))
}

fn identity_key(parts: &[&str]) -> String {
    let mut key = String::new();
    for part in parts {
        key.push_str(&part.len().to_string());
        key.push(':');
        key.push_str(part);
    }
    key
}

fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    encode_base36(u64::from_be_bytes(prefix), HASH_LENGTH)
}

fn encode_base36(mut n: u64, length: usize) -> String {
    let mut result = Vec::with_capacity(length);
    while result.len() < length {
        // remainder is always < 36
        #[allow(clippy::cast_possible_truncation)]
        let remainder = (n % 36) as usize;
        result.push(char::from(BASE36_CHARS[remainder]));
        n /= 36;
    }
    result.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base36_encoding_pads_to_length() {
        assert_eq!(encode_base36(0, 4), "0000");
        assert_eq!(encode_base36(35, 2), "0z");
        assert_eq!(encode_base36(36, 2), "10");
        assert_eq!(encode_base36(u64::MAX, HASH_LENGTH).len(), HASH_LENGTH);
    }

    #[test]
    fn entity_id_is_deterministic() {
        let first = entity_id("npm", "react", Some("18.2.0"));
        let second = entity_id("npm", "react", Some("18.2.0"));

        assert_eq!(first, second);
        assert!(is_valid_id(first.as_str(), ENTITY_PREFIX));
    }

    #[test]
    fn entity_id_distinguishes_versions() {
        let unversioned = entity_id("npm", "react", None);
        let versioned = entity_id("npm", "react", Some("18.2.0"));
        let empty_version = entity_id("npm", "react", Some(""));

        assert_ne!(unversioned, versioned);
        // An empty version string is the same identity as no version
        assert_eq!(unversioned, empty_version);
    }

    #[test]
    fn separators_inside_fields_do_not_collide() {
        assert_ne!(entity_id("a|b", "c", None), entity_id("a", "b|c", None));
        assert_ne!(entity_id("a:b", "c", None), entity_id("a", "b:c", None));
        assert_ne!(entity_id("1:a", "", None), entity_id("", "1:a", None));
        assert_ne!(
            entity_id("npm", "react", Some("1")),
            entity_id("npm", "react1", None)
        );
    }

    #[test]
    fn identity_key_prefixes_byte_lengths() {
        assert_eq!(identity_key(&["npm", "", "é"]), "3:npm0:2:é");
    }

    #[test]
    fn relation_id_depends_on_type_and_direction() {
        let a = entity_id("task", "a", None);
        let b = entity_id("task", "b", None);

        let requires = relation_id(&a, &b, RelationType::Requires);
        let precedes = relation_id(&a, &b, RelationType::Precedes);
        let reversed = relation_id(&b, &a, RelationType::Requires);

        assert_ne!(requires, precedes);
        assert_ne!(requires, reversed);
        assert!(is_valid_id(requires.as_str(), RELATION_PREFIX));
    }

    #[test]
    fn id_validation() {
        assert!(is_valid_id("ent-0123456789abc", "ent"));
        assert!(!is_valid_id("ent-0123456789ab", "ent"));
        assert!(!is_valid_id("ent-0123456789ABC", "ent"));
        assert!(!is_valid_id("rel-0123456789abc", "ent"));
        assert!(!is_valid_id("ent0123456789abc", "ent"));
    }
}
