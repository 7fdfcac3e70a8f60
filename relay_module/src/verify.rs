use axum::http::HeaderMap;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

pub const LINE_SIGNATURE_HEADER: &str = "x-line-signature";

pub fn signature_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(LINE_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Base64 HMAC-SHA256 of the raw body, as LINE computes it.
pub fn compute_line_signature(channel_secret: &str, body: &[u8]) -> Result<String, &'static str> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(channel_secret.as_bytes()).map_err(|_| "bad_secret")?;
    mac.update(body);
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Checks `signature` against the raw, unparsed request body. Verifying a
/// re-serialized body would not be byte-identical.
pub fn verify_line_signature(
    channel_secret: &str,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), &'static str> {
    let signature = signature.ok_or("missing_signature")?;
    let provided = base64::engine::general_purpose::STANDARD
        .decode(signature)
        .map_err(|_| "invalid_signature")?;
    let mut mac =
        Hmac::<Sha256>::new_from_slice(channel_secret.as_bytes()).map_err(|_| "bad_secret")?;
    mac.update(body);
    mac.verify_slice(&provided).map_err(|_| "invalid_signature")
}
