use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Which string the provider signs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureScheme {
    /// Timestamped when the timestamp header is present, body only otherwise.
    #[default]
    Auto,
    Body,
    Timestamped,
}

/// Why a request never reached the HMAC comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingMaterial {
    Signature,
    Timestamp,
}

/// Compute the base64 HMAC-SHA256 the provider would send for this body.
pub fn sign(secret: &str, body: &[u8], timestamp: Option<&str>) -> String {
    keyed_mac(secret, body, timestamp)
        .map(|mac| base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

/// Verify a base64 HMAC-SHA256 signature over `timestamp + body`, or over
/// the body alone when no timestamp is given.
pub fn verify(secret: &str, body: &[u8], signature: &str, timestamp: Option<&str>) -> bool {
    let supplied = match base64::engine::general_purpose::STANDARD.decode(signature.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    match keyed_mac(secret, body, timestamp) {
        Some(mac) => mac.verify_slice(&supplied).is_ok(),
        None => false,
    }
}

/// Resolve which timestamp (if any) participates in the signed string,
/// rejecting requests that lack the material the scheme requires.
pub fn signed_timestamp<'a>(
    scheme: SignatureScheme,
    signature: Option<&str>,
    timestamp: Option<&'a str>,
) -> Result<Option<&'a str>, MissingMaterial> {
    if signature.map_or(true, |s| s.trim().is_empty()) {
        return Err(MissingMaterial::Signature);
    }
    let timestamp = timestamp.filter(|t| !t.trim().is_empty());
    match scheme {
        SignatureScheme::Auto => Ok(timestamp),
        SignatureScheme::Body => Ok(None),
        SignatureScheme::Timestamped => timestamp.map(Some).ok_or(MissingMaterial::Timestamp),
    }
}

/// Compare a presented secret against the configured one in constant time.
/// Both sides are reduced to an HMAC tag first, so lengths do not leak.
pub fn secrets_match(expected: &str, presented: &str) -> bool {
    let Some(tag) = keyed_mac(expected, expected.as_bytes(), None) else {
        return false;
    };
    let tag = tag.finalize().into_bytes();
    match keyed_mac(presented, expected.as_bytes(), None) {
        Some(candidate) => candidate.verify_slice(&tag).is_ok(),
        None => false,
    }
}

fn keyed_mac(secret: &str, body: &[u8], timestamp: Option<&str>) -> Option<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).ok()?;
    if let Some(ts) = timestamp {
        mac.update(ts.as_bytes());
    }
    mac.update(body);
    Some(mac)
}
