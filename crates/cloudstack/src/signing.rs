//! CloudStack request signing.
//!
//! Parameters are sorted by name and their values URL-encoded; the lower-cased
//! query string is signed with HMAC-SHA1 using the API secret, and the base64
//! digest is appended as the `signature` parameter.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use common::{Error, Result};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::collections::BTreeMap;

type HmacSha1 = Hmac<Sha1>;

/// Sorted, URL-encoded `key=value` pairs joined with `&`
pub fn query_string(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Base64 HMAC-SHA1 of the lower-cased query
pub fn signature(query: &str, secret: &str) -> Result<String> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::config(format!("invalid API secret: {e}")))?;
    mac.update(query.to_lowercase().as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Query string with its signature appended
pub fn signed_query(params: &BTreeMap<String, String>, secret: &str) -> Result<String> {
    let query = query_string(params);
    let signature = signature(&query, secret)?;
    Ok(format!("{query}&signature={}", urlencoding::encode(&signature)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_query_is_sorted_and_encoded() {
        let query = query_string(&params(&[
            ("response", "json"),
            ("command", "addIpToNic"),
            ("name", "web 1/a"),
        ]));

        assert_eq!(query, "command=addIpToNic&name=web%201%2Fa&response=json");
    }

    #[test]
    fn test_signature() {
        let query = "apikey=EXOkey&command=listVirtualMachines&id=8a1f1c3e-1b2c-4d5e-9f00-112233445566&response=json";
        assert_eq!(
            signature(query, "secret-value").unwrap(),
            "XlnyRa3o+yEwaTyaO7nsmS//aZo="
        );
    }

    #[test]
    fn test_signature_ignores_case() {
        assert_eq!(
            signature("command=listVirtualMachines", "s").unwrap(),
            signature("COMMAND=LISTVIRTUALMACHINES", "s").unwrap()
        );
    }

    #[test]
    fn test_signed_query_escapes_signature() {
        let signed = signed_query(
            &params(&[
                ("apikey", "k"),
                ("command", "addIpToNic"),
                ("ipaddress", "192.0.2.10"),
                ("nicid", "1128bd56-b4d9-4ac6-a7b9-c715b187ce11"),
                ("response", "json"),
            ]),
            "s",
        )
        .unwrap();

        assert!(signed.ends_with("&signature=NvkEQqwpvYZCuPWme44wbGTr6%2F8%3D"));
        assert!(signed.starts_with("apikey=k&command=addIpToNic&"));
    }
}
