//! Request signing shared by both gateways
//!
//! Both providers sign a `key=value&key=value` string with HMAC-SHA256 and
//! exchange the digest as lower-case hex. They differ only in which fields
//! are signed and in what order.

use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

type HmacSha256 = Hmac<Sha256>;

/// HMAC keys of any length are valid; this only fails on an empty secret,
/// which is a configuration error.
fn mac(key: &str) -> Result<HmacSha256, String> {
    if key.is_empty() {
        return Err("signing key is empty".to_string());
    }
    HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| e.to_string())
}

/// Lower-case hex HMAC-SHA256 of `message`
pub fn sign(key: &str, message: &str) -> Result<String, String> {
    let mut mac = mac(key)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time comparison of a hex signature against `message`
pub fn verify(key: &str, message: &str, signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = mac(key) else {
        return false;
    };
    mac.update(message.as_bytes());
    mac.verify_slice(&signature).is_ok()
}

/// `k1=v1&k2=v2` in the given order
pub fn canonical<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k.as_ref(), v.as_ref()))
        .collect::<Vec<_>>()
        .join("&")
}

/// Render a JSON field the way gateways put it in the signed string:
/// strings unquoted, null as empty, everything else as compact JSON.
pub fn field_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// All fields of `object` sorted by key, as `k=v&…`
pub fn sorted_canonical(object: &Map<String, Value>) -> String {
    let mut keys: Vec<&String> = object.keys().collect();
    keys.sort();
    let pairs: Vec<(&str, String)> = keys
        .into_iter()
        .map(|k| (k.as_str(), field_string(object.get(k))))
        .collect();
    canonical(&pairs)
}

/// Strip Vietnamese diacritics: decompose, drop combining marks, and map
/// the letters that have no decomposition.
pub fn strip_accents(input: &str) -> String {
    input
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| match c {
            'đ' => 'd',
            'Đ' => 'D',
            other => other,
        })
        .collect()
}

/// Gateway-safe text: no accents, spaces as `_`
pub fn normalize_text(input: &str) -> String {
    strip_accents(input.trim()).replace(' ', "_")
}

/// [`normalize_text`] truncated to `max_chars` characters
pub fn normalize_description(input: &str, max_chars: usize) -> String {
    normalize_text(input).chars().take(max_chars).collect()
}
