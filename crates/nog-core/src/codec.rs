//! Canonical JSON encoding and content identity.
//!
//! The canonical form is UTF-8, keys sorted byte-wise ascending, compact
//! `,`/`:` separators, no `\uXXXX` escaping, and no trailing newline.
//! `serde_json::Value`'s default (non-`preserve_order`) map representation
//! is already a `BTreeMap`, and `serde_json::to_vec` already emits compact,
//! non-escaping output, so producing the canonical form needs no custom
//! writer: it falls out of using `serde_json::Value` without the
//! `preserve_order` feature.
//!
//! A "pretty" form (2-space indent, trailing newline) exists for
//! human-facing output only and never participates in identity.

use serde_json::Value;

use crate::hash::Sha1;
use crate::Error;

/// Keys stripped before computing content identity: they describe the
/// entry's relationship to the store, not its content.
const IDENTITY_EXCLUDED_KEYS: &[&str] = &["_id", "_idversion", "errata"];

pub fn to_canonical_bytes(value: &Value) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(value).map_err(Error::Codec)
}

pub fn to_pretty_string(value: &Value) -> Result<String, Error> {
    let mut s = serde_json::to_string_pretty(value).map_err(Error::Codec)?;
    s.push('\n');
    Ok(s)
}

/// Returns `value` with the identity-excluded keys removed, for entries
/// represented as JSON objects. Non-object values are returned unchanged.
pub fn strip_identity_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut cleaned = map.clone();
            for key in IDENTITY_EXCLUDED_KEYS {
                cleaned.remove(*key);
            }
            Value::Object(cleaned)
        }
        other => other.clone(),
    }
}

/// The content identity of an entry: SHA-1 of the canonical encoding with
/// `_id`/`_idversion`/`errata` stripped.
pub fn content_id(value: &Value) -> Result<Sha1, Error> {
    let stripped = strip_identity_keys(value);
    let bytes = to_canonical_bytes(&stripped)?;
    Ok(Sha1::digest(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_and_uses_compact_separators() {
        let value = json!({"b": 1, "a": 2});
        let bytes = to_canonical_bytes(&value).unwrap();
        assert_eq!(bytes, br#"{"a":2,"b":1}"#);
    }

    #[test]
    fn content_id_ignores_id_fields() {
        let with_id = json!({"_id": "x", "_idversion": 1, "text": "hi"});
        let without_id = json!({"text": "hi"});
        assert_eq!(content_id(&with_id).unwrap(), content_id(&without_id).unwrap());
    }

    #[test]
    fn content_id_ignores_errata() {
        let with_errata = json!({"text": "hi", "errata": ["x"]});
        let without_errata = json!({"text": "hi"});
        assert_eq!(
            content_id(&with_errata).unwrap(),
            content_id(&without_errata).unwrap()
        );
    }

    #[test]
    fn does_not_escape_unicode() {
        let value = json!({"text": "héllo"});
        let bytes = to_canonical_bytes(&value).unwrap();
        assert!(String::from_utf8(bytes).unwrap().contains('é'));
    }
}
