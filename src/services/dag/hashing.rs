// Plan Hashing
//
// Canonical SHA-256 hashing for plan identity and scan data fingerprints.
// Payloads go through serde_json::Value, objects are re-keyed through
// BTreeMap ordering, and the compact serialization is hashed and hex encoded.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

use crate::models::{LogicalEdge, LogicalNode, Relation};

/// Canonical value representation with sorted keys.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum CanonicalValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<CanonicalValue>),
    Object(BTreeMap<String, CanonicalValue>),
}

fn canonicalize_value(value: serde_json::Value) -> CanonicalValue {
    match value {
        serde_json::Value::Null => CanonicalValue::Null,
        serde_json::Value::Bool(b) => CanonicalValue::Bool(b),
        serde_json::Value::Number(n) => CanonicalValue::Number(n),
        serde_json::Value::String(s) => CanonicalValue::String(s),
        serde_json::Value::Array(arr) => {
            CanonicalValue::Array(arr.into_iter().map(canonicalize_value).collect())
        }
        serde_json::Value::Object(obj) => CanonicalValue::Object(
            obj.into_iter()
                .map(|(k, v)| (k, canonicalize_value(v)))
                .collect(),
        ),
    }
}

/// Canonical JSON bytes of any serializable payload
pub fn canonical_bytes<T: Serialize>(payload: &T) -> Result<Vec<u8>, serde_json::Error> {
    let json_value = serde_json::to_value(payload)?;
    serde_json::to_vec(&canonicalize_value(json_value))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Serialize)]
struct PlanPayload<'a> {
    nodes: &'a [LogicalNode],
    edges: &'a [LogicalEdge],
    version: u32,
}

/// Content hash of `{nodes, edges, version}`
pub fn plan_content_hash(
    nodes: &[LogicalNode],
    edges: &[LogicalEdge],
    version: u32,
) -> Result<String, serde_json::Error> {
    let bytes = canonical_bytes(&PlanPayload {
        nodes,
        edges,
        version,
    })?;
    Ok(sha256_hex(&bytes))
}

/// Fingerprint of supplied scan data; row order and column order both count
pub fn scan_data_fingerprint(
    scan_results: &HashMap<String, Relation>,
) -> Result<String, serde_json::Error> {
    let ordered: BTreeMap<&str, Vec<Vec<(&str, &crate::models::Value)>>> = scan_results
        .iter()
        .map(|(id, rows)| (id.as_str(), rows.iter().map(|row| row.iter().collect()).collect()))
        .collect();
    Ok(sha256_hex(&canonical_bytes(&ordered)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn test_canonical_ordering() {
        let mut map1 = serde_json::Map::new();
        map1.insert("z".to_string(), serde_json::json!("last"));
        map1.insert("a".to_string(), serde_json::json!("first"));

        let mut map2 = serde_json::Map::new();
        map2.insert("a".to_string(), serde_json::json!("first"));
        map2.insert("z".to_string(), serde_json::json!("last"));

        let bytes1 = canonical_bytes(&serde_json::Value::Object(map1)).unwrap();
        let bytes2 = canonical_bytes(&serde_json::Value::Object(map2)).unwrap();

        assert_eq!(bytes1, bytes2, "Object key ordering must be canonical");
        assert_eq!(String::from_utf8(bytes1).unwrap(), r#"{"a":"first","z":"last"}"#);
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_scan_fingerprint_sensitive_to_row_order() {
        let mut a = HashMap::new();
        a.insert("s".to_string(), vec![row!("id" => 1i64), row!("id" => 2i64)]);
        let mut b = HashMap::new();
        b.insert("s".to_string(), vec![row!("id" => 2i64), row!("id" => 1i64)]);

        let fa = scan_data_fingerprint(&a).unwrap();
        assert_eq!(fa, scan_data_fingerprint(&a.clone()).unwrap());
        assert_ne!(fa, scan_data_fingerprint(&b).unwrap());
    }
}
