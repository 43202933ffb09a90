// tidemark/src/slack_signature.rs
//
// Slack request signing: `v0=` + hex(HMAC-SHA256(secret, "v0:{ts}:{body}")).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Requests older (or newer) than this are replays.
pub const MAX_CLOCK_SKEW_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    Valid,
    Stale,
    Malformed,
    Mismatch,
}

/// Checks `X-Slack-Signature` for the raw body against the signing secret.
/// `now` is the current unix time in seconds.
pub fn verify(
    signing_secret: &str,
    timestamp: &str,
    signature: &str,
    body: &[u8],
    now: i64,
) -> SignatureCheck {
    let Ok(sent_at) = timestamp.trim().parse::<i64>() else {
        return SignatureCheck::Malformed;
    };
    if (now - sent_at).abs() > MAX_CLOCK_SKEW_SECS {
        return SignatureCheck::Stale;
    }
    let Some(expected) = signature.strip_prefix("v0=").and_then(decode_hex) else {
        return SignatureCheck::Malformed;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(signing_secret.as_bytes()) else {
        return SignatureCheck::Malformed;
    };
    mac.update(b"v0:");
    mac.update(timestamp.trim().as_bytes());
    mac.update(b":");
    mac.update(body);
    // constant time
    match mac.verify_slice(&expected) {
        Ok(()) => SignatureCheck::Valid,
        Err(_) => SignatureCheck::Mismatch,
    }
}

/// Value Slack would send for `body` at `timestamp`.
#[cfg(test)]
pub fn sign(signing_secret: &str, timestamp: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes()).ok()?;
    mac.update(format!("v0:{timestamp}:").as_bytes());
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    Some(format!(
        "v0={}",
        digest.iter().map(|b| format!("{b:02x}")).collect::<String>()
    ))
}

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 {
        return None;
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(raw.get(i..i + 2)?, 16).ok())
        .collect()
}
