//! Mailgun webhook signature verification.
//!
//! Mailgun signs webhook requests using HMAC-SHA256.
//! Reference: https://documentation.mailgun.com/docs/mailgun/user-manual/events/webhooks/#securing-webhooks

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the lowercase hex signature Mailgun would send for `timestamp` and `token`.
pub fn compute_signature(timestamp: &str, token: &str, signing_key: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(signing_key.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(token.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a Mailgun webhook signature.
///
/// Mailgun webhooks include three fields for signature verification:
/// - timestamp: Unix epoch seconds when the webhook was generated
/// - token: A randomly generated string
/// - signature: HMAC-SHA256 hex digest of timestamp + token
///
/// Empty fields are not special: they hash like any other input and the
/// result simply has to match. The comparison runs in constant time.
///
/// # Arguments
///
/// * `timestamp` - The 'timestamp' field from the webhook payload
/// * `token` - The 'token' field from the webhook payload
/// * `signature` - The 'signature' field from the webhook payload
/// * `signing_key` - Your Mailgun HTTP webhook signing key
pub fn verify_mailgun_signature(
    timestamp: &str,
    token: &str,
    signature: &str,
    signing_key: &str,
) -> bool {
    let expected = compute_signature(timestamp, token, signing_key);
    constant_time_compare(&expected, signature)
}

/// Check that a webhook timestamp lies within `max_age_seconds` of `now`.
///
/// Non-numeric timestamps are never fresh. Clock skew in either direction
/// counts against the window.
pub fn is_timestamp_fresh(timestamp: &str, max_age_seconds: u64, now: u64) -> bool {
    let webhook_time: u64 = match timestamp.trim().parse() {
        Ok(t) => t,
        Err(_) => return false,
    };

    now.abs_diff(webhook_time) <= max_age_seconds
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNING_KEY: &str = "key-3ax6xnjp29jd6fds4gc373sgvjxteol0";
    const TIMESTAMP: &str = "1529006854";
    const TOKEN: &str = "a8ce0edb2dd8912";

    #[test]
    fn test_compute_signature_known_vector() {
        // RFC 4231 test case 2, split across timestamp and token.
        let signature = compute_signature("what do ya want ", "for nothing?", "Jefe");
        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify_signature_valid() {
        let signature = compute_signature(TIMESTAMP, TOKEN, SIGNING_KEY);

        assert_eq!(signature.len(), 64);
        assert!(signature
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert!(verify_mailgun_signature(TIMESTAMP, TOKEN, &signature, SIGNING_KEY));
    }

    #[test]
    fn test_verify_signature_rejects_every_single_char_mutation() {
        let signature = compute_signature(TIMESTAMP, TOKEN, SIGNING_KEY);

        for i in 0..signature.len() {
            let mut bytes = signature.clone().into_bytes();
            bytes[i] = if bytes[i] == b'0' { b'1' } else { b'0' };
            let mutated = String::from_utf8(bytes).unwrap();
            assert!(
                !verify_mailgun_signature(TIMESTAMP, TOKEN, &mutated, SIGNING_KEY),
                "mutation at {i} accepted"
            );
        }
    }

    #[test]
    fn test_verify_signature_is_case_sensitive() {
        let signature = compute_signature(TIMESTAMP, TOKEN, SIGNING_KEY);
        let upper = signature.to_uppercase();
        if upper != signature {
            assert!(!verify_mailgun_signature(TIMESTAMP, TOKEN, &upper, SIGNING_KEY));
        }
    }

    #[test]
    fn test_verify_signature_wrong_key_or_fields() {
        let signature = compute_signature(TIMESTAMP, TOKEN, SIGNING_KEY);

        assert!(!verify_mailgun_signature(TIMESTAMP, TOKEN, &signature, "other-key"));
        assert!(!verify_mailgun_signature("1529006855", TOKEN, &signature, SIGNING_KEY));
        assert!(!verify_mailgun_signature(TIMESTAMP, "b8ce0edb2dd8912", &signature, SIGNING_KEY));
        assert!(!verify_mailgun_signature(TIMESTAMP, TOKEN, "", SIGNING_KEY));
    }

    #[test]
    fn test_verify_signature_concatenates_without_separator() {
        // "15290068" + "54a8ce..." hashes the same bytes as "1529006854" + "a8ce...".
        let signature = compute_signature(TIMESTAMP, TOKEN, SIGNING_KEY);
        assert!(verify_mailgun_signature(
            "15290068",
            "54a8ce0edb2dd8912",
            &signature,
            SIGNING_KEY
        ));
    }

    #[test]
    fn test_verify_signature_empty_fields_are_deterministic() {
        let signature = compute_signature("", "", SIGNING_KEY);

        assert_eq!(signature, compute_signature("", "", SIGNING_KEY));
        assert!(verify_mailgun_signature("", "", &signature, SIGNING_KEY));
        assert!(!verify_mailgun_signature("", "", "sig", SIGNING_KEY));
    }

    #[test]
    fn test_is_timestamp_fresh() {
        assert!(is_timestamp_fresh("1000", 300, 1000));
        assert!(is_timestamp_fresh("1000", 300, 1300));
        assert!(is_timestamp_fresh("1300", 300, 1000));
        assert!(!is_timestamp_fresh("1000", 300, 1301));
        assert!(!is_timestamp_fresh("1301", 300, 1000));
        assert!(!is_timestamp_fresh("not-a-number", 300, 1000));
        assert!(!is_timestamp_fresh("", 300, 1000));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }
}
