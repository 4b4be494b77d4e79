use axum::http::HeaderMap;
use serde_json::{Map, Value};
use tracing::debug;

// For signature verification
use hex::decode as hex_decode;
use hmac::{Hmac, Mac};
use sha1::Sha1;
type HmacSha1 = Hmac<Sha1>;

/// Verifies a GitHub `X-Hub-Signature` header against the raw request body.
/// The `sha1=` prefix is optional.
pub fn verify_hub_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    let git_signature = signature_header
        .strip_prefix("sha1=")
        .unwrap_or(signature_header);

    let mut mac = match HmacSha1::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);

    match hex_decode(git_signature) {
        // Constant-time comparison
        Ok(git_signature_bytes) => mac.verify_slice(&git_signature_bytes).is_ok(),
        Err(_) => {
            debug!("Signature '{}' is not valid hex", git_signature);
            false
        }
    }
}

/// Hex encoded HMAC-SHA1 of `payload`, as GitHub sends it without the prefix.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC can take a key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// 32 random hex digits to paste into both the projects file and GitHub
pub fn generate_secret() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Collapses multi-valued key/value pairs into a map keeping the first value of each key.
pub fn first_values<K, V, I>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut map = Map::new();
    for (key, value) in pairs {
        map.entry(key.into())
            .or_insert_with(|| Value::String(value.into()));
    }
    map
}

/// First value of every header, keyed by lowercase header name.
/// Values that aren't visible ASCII are skipped.
pub fn header_values(headers: &HeaderMap) -> Value {
    Value::Object(first_values(headers.iter().filter_map(|(name, value)| {
        value.to_str().ok().map(|value| (name.as_str(), value))
    })))
}

/// First value of every query parameter.
pub fn query_values(raw_query: Option<&str>) -> Value {
    let pairs = raw_query
        .map(|query| url::form_urlencoded::parse(query.as_bytes()).collect::<Vec<_>>())
        .unwrap_or_default();
    Value::Object(first_values(pairs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};

    fn name(raw: &str) -> HeaderName {
        HeaderName::from_bytes(raw.as_bytes()).unwrap()
    }

    const BODY: &[u8] = br#"{"ref":"refs/heads/main"}"#;

    #[test]
    fn test_valid_signature_with_and_without_prefix() {
        let signature = sign_payload("s3cr3t", BODY);
        assert_eq!(signature.len(), 40);
        assert!(verify_hub_signature("s3cr3t", BODY, &format!("sha1={}", signature)));
        assert!(verify_hub_signature("s3cr3t", BODY, &signature));
    }

    #[test]
    fn test_known_signature() {
        // RFC 2202 test case 2
        assert_eq!(
            sign_payload("Jefe", b"what do ya want for nothing?"),
            "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79"
        );
    }

    #[test]
    fn test_flipped_byte_is_rejected() {
        let signature = format!("sha1={}", sign_payload("s3cr3t", BODY));

        let mut tampered = BODY.to_vec();
        tampered[3] ^= 0x01;
        assert!(!verify_hub_signature("s3cr3t", &tampered, &signature));
        assert!(!verify_hub_signature("s3cr3u", BODY, &signature));
    }

    #[test]
    fn test_malformed_signature_is_rejected() {
        assert!(!verify_hub_signature("s3cr3t", BODY, ""));
        assert!(!verify_hub_signature("s3cr3t", BODY, "sha1=not-hex"));
        assert!(!verify_hub_signature("s3cr3t", BODY, "sha1=abcd"));
        let sha256 = format!("sha256={}", sign_payload("s3cr3t", BODY));
        assert!(!verify_hub_signature("s3cr3t", BODY, &sha256));
    }

    #[test]
    fn test_first_values_keep_first() {
        let map = first_values(vec![("a", "1"), ("b", "2"), ("a", "3")]);
        assert_eq!(map.get("a"), Some(&Value::from("1")));
        assert_eq!(map.get("b"), Some(&Value::from("2")));
    }

    #[test]
    fn test_header_values_lowercase_names() {
        let mut headers = HeaderMap::new();
        headers.insert(name("X-GitHub-Delivery"), HeaderValue::from_static("d-1"));
        headers.append(name("X-Multi"), HeaderValue::from_static("first"));
        headers.append(name("X-Multi"), HeaderValue::from_static("second"));

        let values = header_values(&headers);
        assert_eq!(values["x-github-delivery"], "d-1");
        assert_eq!(values["x-multi"], "first");
    }

    #[test]
    fn test_query_values_decode() {
        let values = query_values(Some("env=staging%20eu&env=prod&flag"));
        assert_eq!(values["env"], "staging eu");
        assert_eq!(values["flag"], "");
        assert_eq!(query_values(None), Value::Object(Map::new()));
    }

    #[test]
    fn test_generate_secret() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 32);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(secret, generate_secret());
    }
}
