//! Canonical message type and the intake normalizer.
//!
//! `normalize` is infallible: whatever the SMTP DATA payload looks like, it
//! produces a best-effort `CanonicalMessage`. Encoding errors are replaced,
//! MIME parse failures fall back to the raw line-joined text.

use mail_parser::MessageParser;

/// The normalized `{subject, body}` pair used by the dispatcher regardless
/// of intake protocol. Built once per inbound delivery, immutable after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalMessage {
    pub subject: String,
    pub body: String,
}

impl CanonicalMessage {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Normalize a raw mail payload into a canonical message.
///
/// The subject comes from the first line whose header name matches
/// `subject:` case-insensitively; absent header yields an empty subject.
/// The body is every decoded line joined by newlines — headers are kept
/// in the forwarded body. If the payload parses as multipart MIME the
/// body is replaced with the newline-joined part payloads instead.
pub fn normalize(raw: &[u8]) -> CanonicalMessage {
    let text = String::from_utf8_lossy(raw);

    let mut subject = String::new();
    let mut subject_seen = false;
    let mut body = String::new();
    for line in text.lines() {
        if !subject_seen {
            let lower = line.to_ascii_lowercase();
            if let Some(rest) = lower.strip_prefix("subject:") {
                let value_start = line.len() - rest.len();
                subject = line[value_start..].trim_start().to_string();
                subject_seen = true;
            }
        }
        body.push_str(line);
        body.push('\n');
    }

    if let Some(joined) = multipart_body(raw) {
        body = joined;
    }

    CanonicalMessage { subject, body }
}

/// Join the text payloads of a multipart message, or `None` if the payload
/// is not parseable multipart MIME.
fn multipart_body(raw: &[u8]) -> Option<String> {
    use mail_parser::MimeHeaders;

    let parsed = MessageParser::default().parse(raw)?;
    let is_multipart = parsed
        .content_type()
        .is_some_and(|ct| ct.ctype().eq_ignore_ascii_case("multipart"));
    if !is_multipart {
        return None;
    }

    let mut parts = Vec::new();
    let mut pos = 0;
    while let Some(text) = parsed.body_text(pos) {
        parts.push(text.to_string());
        pos += 1;
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_extracted_case_insensitively() {
        let msg = normalize(b"sUbJeCt: Hello\r\n\r\nworld");
        assert_eq!(msg.subject, "Hello");
    }

    #[test]
    fn missing_subject_yields_empty_string() {
        let msg = normalize(b"From: a@x\r\nTo: b@x\r\n\r\nno subject here");
        assert_eq!(msg.subject, "");
        assert!(msg.body.contains("no subject here"));
    }

    #[test]
    fn body_keeps_headers_and_line_order() {
        let msg = normalize(b"From: a@x\r\nSubject: Foo\r\n\r\nFoo bar");
        assert_eq!(msg.subject, "Foo");
        assert_eq!(msg.body, "From: a@x\nSubject: Foo\n\nFoo bar\n");
    }

    #[test]
    fn relay_scenario_from_plain_session() {
        let msg = normalize(b"From: a@x\r\nTo: b@x\r\nSubject: Foo\r\n\r\nFoo bar");
        assert_eq!(msg.subject, "Foo");
        assert!(msg.body.contains("Foo bar"));
    }

    #[test]
    fn first_subject_line_wins() {
        let msg = normalize(b"Subject: first\r\nSubject: second\r\n\r\nbody");
        assert_eq!(msg.subject, "first");
    }

    #[test]
    fn empty_first_subject_still_wins() {
        let msg = normalize(b"Subject:\r\nSubject: second\r\n\r\nbody");
        assert_eq!(msg.subject, "");
    }

    #[test]
    fn multipart_body_is_joined_part_payloads() {
        let raw = concat!(
            "From: a@x\r\n",
            "To: b@x\r\n",
            "Subject: Parts\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n",
            "\r\n",
            "--XYZ\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "part one\r\n",
            "--XYZ\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "part two\r\n",
            "--XYZ--\r\n",
        );
        let msg = normalize(raw.as_bytes());
        assert_eq!(msg.subject, "Parts");
        assert!(msg.body.contains("part one"));
        assert!(msg.body.contains("part two"));
        // The multipart override replaces the raw line-joined text.
        assert!(!msg.body.contains("Content-Type"));
    }

    #[test]
    fn malformed_mime_falls_back_to_raw_text() {
        let raw = concat!(
            "Subject: Broken\r\n",
            "Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n",
            "\r\n",
            "this never opens a boundary",
        );
        let msg = normalize(raw.as_bytes());
        assert_eq!(msg.subject, "Broken");
        assert!(msg.body.contains("this never opens a boundary"));
    }

    #[test]
    fn undecodable_bytes_are_replaced_not_fatal() {
        let msg = normalize(b"Subject: ok\r\n\r\n\xff\xfe body");
        assert_eq!(msg.subject, "ok");
        assert!(msg.body.contains("body"));
    }
}
