//! Plain-text email rendering for relayed webhooks.
//!
//! Mailgun hands us the message already taken apart. The admin endpoint
//! wants an RFC 5322 message, so this module puts a minimal one back
//! together: the four headers from the webhook, the fields a sendable
//! message requires (`Message-ID`, MIME headers), and a plain-text body.

use std::borrow::Cow;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::WebhookRequest;

/// RFC 5322 hard limit on line length, excluding CRLF.
const MAX_LINE_OCTETS: usize = 998;

/// Longer header values are encoded so they can be folded.
const MAX_UNENCODED_HEADER_OCTETS: usize = 900;

const BASE64_LINE_WIDTH: usize = 76;

/// Folding target for address lists, header name included.
const MAX_HEADER_LINE_OCTETS: usize = 78;

/// Raw bytes per encoded word; 45 bytes become 60 base64 characters,
/// keeping each folded header line under 78 columns.
const ENCODED_WORD_BYTES: usize = 45;

/// Minimal email rebuilt from webhook fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayMessage {
    pub to: String,
    pub from: String,
    pub date: String,
    pub subject: String,
    pub body: String,
}

impl RelayMessage {
    /// Copy the message fields of a verified webhook verbatim.
    pub fn from_request(request: &WebhookRequest) -> Self {
        Self {
            to: request.to.clone(),
            from: request.from.clone(),
            date: request.date.clone(),
            subject: request.subject.clone(),
            body: request.body.clone(),
        }
    }

    /// Serialize with a fresh `Message-ID` under `message_id_domain`.
    pub fn to_email_string(&self, message_id_domain: &str) -> String {
        let message_id = format!("{}@{}", Uuid::new_v4(), message_id_domain);
        self.render(&message_id, Utc::now())
    }

    /// Serialize to canonical email text.
    ///
    /// `now` is only used when the webhook carried no `Date`.
    pub fn render(&self, message_id: &str, now: DateTime<Utc>) -> String {
        let date: Cow<'_, str> = if self.date.trim().is_empty() {
            Cow::Owned(now.to_rfc2822())
        } else {
            Cow::Borrowed(&self.date)
        };
        let (transfer_encoding, body) = encode_body(&self.body);

        let mut headers: Vec<(&str, Cow<'_, str>)> = Vec::with_capacity(8);
        headers.push(("Date", encode_date_value(&date)));
        if !self.from.is_empty() {
            headers.push(("From", encode_address_list("From", &self.from)));
        }
        if !self.to.is_empty() {
            headers.push(("To", encode_address_list("To", &self.to)));
        }
        headers.push(("Message-ID", Cow::Owned(format!("<{message_id}>"))));
        if !self.subject.is_empty() {
            headers.push(("Subject", encode_header_value(&self.subject)));
        }
        headers.push(("MIME-Version", Cow::Borrowed("1.0")));
        headers.push(("Content-Type", Cow::Borrowed("text/plain; charset=UTF-8")));
        headers.push(("Content-Transfer-Encoding", Cow::Borrowed(transfer_encoding)));

        let headers_len: usize = headers
            .iter()
            .map(|(k, v)| k.len() + 2 + v.len() + 2)
            .sum();

        let mut raw = String::with_capacity(headers_len + 2 + body.len());
        for (name, value) in &headers {
            raw.push_str(name);
            raw.push_str(": ");
            raw.push_str(value);
            raw.push_str("\r\n");
        }
        raw.push_str("\r\n");
        raw.push_str(&body);

        raw
    }
}

fn is_plain_header_text(value: &str) -> bool {
    value
        .bytes()
        .all(|b| b == b'\t' || (0x20..0x7f).contains(&b))
}

/// Write an unstructured header value as-is when the format allows it,
/// otherwise as folded RFC 2047 base64 encoded-words.
fn encode_header_value(value: &str) -> Cow<'_, str> {
    if is_plain_header_text(value) && value.len() <= MAX_UNENCODED_HEADER_OCTETS {
        return Cow::Borrowed(value);
    }

    Cow::Owned(encoded_words(value))
}

/// `Date` is structured and cannot hold encoded-words; line breaks collapse
/// to spaces.
fn encode_date_value(value: &str) -> Cow<'_, str> {
    if value.contains(['\r', '\n']) {
        Cow::Owned(single_line(value))
    } else {
        Cow::Borrowed(value)
    }
}

/// Write an address list (`From`, `To`).
///
/// Encoded-words may not appear inside an addr-spec (RFC 2047 section 5),
/// so only display names are encoded. Addresses and separators stay
/// literal and long lists fold after commas.
fn encode_address_list<'a>(name: &str, value: &'a str) -> Cow<'a, str> {
    if is_plain_header_text(value) && value.len() <= MAX_UNENCODED_HEADER_OCTETS {
        return Cow::Borrowed(value);
    }

    let mut out = String::with_capacity(value.len() + 16);
    let mut line_len = name.len() + 2;

    for (i, mailbox) in split_mailboxes(value).into_iter().enumerate() {
        let mailbox = encode_mailbox(mailbox);
        let first_line_len = mailbox.split("\r\n").next().map(str::len).unwrap_or(0);

        if i > 0 {
            if line_len + 2 + first_line_len > MAX_HEADER_LINE_OCTETS {
                out.push_str(",\r\n ");
                line_len = 1;
            } else {
                out.push_str(", ");
                line_len += 2;
            }
        }

        line_len = match mailbox.rfind("\r\n") {
            Some(pos) => mailbox.len() - pos - 2,
            None => line_len + mailbox.len(),
        };
        out.push_str(&mailbox);
    }

    Cow::Owned(out)
}

/// Split an address list on commas outside quoted strings and angle brackets.
fn split_mailboxes(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut escaped = false;

    for (idx, ch) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' if !in_angle => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => {
                parts.push(&value[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);

    parts
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

/// Encode one mailbox: display name as a phrase, `<addr-spec>` literal.
fn encode_mailbox(mailbox: &str) -> String {
    match mailbox.rfind('<') {
        Some(open) if mailbox.ends_with('>') => {
            let display = mailbox[..open].trim();
            let address = single_line(&mailbox[open..]);
            if display.is_empty() {
                address
            } else {
                format!("{} {}", encode_phrase(display), address)
            }
        }
        _ => single_line(mailbox),
    }
}

fn encode_phrase(display: &str) -> String {
    if is_plain_header_text(display) {
        return display.to_string();
    }

    // Encoded-words cannot sit inside a quoted string.
    let unquoted = display
        .strip_prefix('"')
        .and_then(|d| d.strip_suffix('"'))
        .unwrap_or(display);

    encoded_words(unquoted)
}

/// Join the non-empty pieces between line breaks with single spaces.
fn single_line(value: &str) -> String {
    value
        .split(['\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Folded RFC 2047 base64 encoded-words for `value`.
fn encoded_words(value: &str) -> String {
    let mut words = Vec::new();
    let mut chunk_start = 0;
    let mut chunk_len = 0;

    // Split on char boundaries so every word decodes to valid UTF-8 alone.
    for (idx, ch) in value.char_indices() {
        if chunk_len + ch.len_utf8() > ENCODED_WORD_BYTES {
            words.push(encoded_word(&value[chunk_start..idx]));
            chunk_start = idx;
            chunk_len = 0;
        }
        chunk_len += ch.len_utf8();
    }
    words.push(encoded_word(&value[chunk_start..]));

    words.join("\r\n ")
}

fn encoded_word(text: &str) -> String {
    format!("=?UTF-8?B?{}?=", STANDARD.encode(text.as_bytes()))
}

/// Pick a transfer encoding and produce the body as it goes on the wire.
fn encode_body(body: &str) -> (&'static str, String) {
    let normalized = normalize_line_endings(body);

    let seven_bit = normalized.split("\r\n").all(|line| {
        line.len() <= MAX_LINE_OCTETS
            && line
                .bytes()
                .all(|b| b.is_ascii() && b != b'\0' && b != b'\r' && b != b'\n')
    });

    if seven_bit {
        return ("7bit", normalized);
    }

    let encoded = STANDARD.encode(normalized.as_bytes());
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE_WIDTH * 2);
    for (i, ch) in encoded.chars().enumerate() {
        if i > 0 && i % BASE64_LINE_WIDTH == 0 {
            wrapped.push_str("\r\n");
        }
        wrapped.push(ch);
    }

    ("base64", wrapped)
}

/// Turn bare LF and CRLF line breaks into CRLF.
fn normalize_line_endings(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 16);
    let mut segments = text.split('\n').peekable();

    while let Some(segment) = segments.next() {
        if segments.peek().is_some() {
            out.push_str(segment.strip_suffix('\r').unwrap_or(segment));
            out.push_str("\r\n");
        } else {
            out.push_str(segment);
        }
    }

    out
}
