use mailparse::{MailHeaderMap, ParsedMail};

/// Collapse a body into a single line of at most `max_chars` characters.
pub fn normalize_snippet(s: &str, max_chars: usize) -> String {
    let mut out = String::new();
    for line in s.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(line);
        if out.chars().count() >= max_chars {
            break;
        }
    }
    out.chars().take(max_chars).collect()
}

/// Fields pulled out of a raw RFC 822 message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMessage {
    pub message_id: Option<String>,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub date_epoch: i64,
}

/// Best-effort parse: never fails, falls back to the raw bytes as body.
pub fn parse_message(raw_rfc822: &[u8]) -> ParsedMessage {
    let parsed = match mailparse::parse_mail(raw_rfc822) {
        Ok(p) => p,
        Err(_) => {
            return ParsedMessage {
                subject: "(no subject)".to_string(),
                sender: "(unknown)".to_string(),
                body: String::from_utf8_lossy(raw_rfc822).into_owned(),
                ..Default::default()
            };
        }
    };

    let header = |name: &str| {
        parsed
            .headers
            .get_first_value(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let date_epoch = header("Date")
        .and_then(|d| mailparse::dateparse(&d).ok())
        .unwrap_or(0);

    let body = extract_text_part(&parsed).unwrap_or_else(|| {
        parsed
            .get_body()
            .unwrap_or_else(|_| String::from_utf8_lossy(raw_rfc822).into_owned())
    });

    ParsedMessage {
        message_id: header("Message-ID"),
        sender: header("From").unwrap_or_else(|| "(unknown)".to_string()),
        subject: header("Subject").unwrap_or_else(|| "(no subject)".to_string()),
        body,
        date_epoch,
    }
}

fn is_attachment(p: &ParsedMail) -> bool {
    p.headers
        .get_first_value("Content-Disposition")
        .is_some_and(|d| d.to_ascii_lowercase().starts_with("attachment"))
}

/// Prefer the first inline text/plain part, then text/html rendered as text.
fn extract_text_part(p: &ParsedMail) -> Option<String> {
    find_part(p, "text/plain")
        .and_then(|part| part.get_body().ok())
        .or_else(|| {
            find_part(p, "text/html")
                .and_then(|part| part.get_body().ok())
                .map(|html| html_to_text(&html))
        })
}

fn find_part<'a, 'm>(p: &'a ParsedMail<'m>, mime: &str) -> Option<&'a ParsedMail<'m>> {
    if p.ctype.mimetype.eq_ignore_ascii_case(mime) && !is_attachment(p) {
        return Some(p);
    }
    p.subparts.iter().find_map(|sp| find_part(sp, mime))
}

pub fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 100).unwrap_or_else(|_| html.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_message_headers() {
        let raw = b"Message-ID: <abc@mail.test>\r\n\
From: Boss <boss@company.com>\r\n\
Subject: =?UTF-8?Q?Budget_r=C3=A9view?=\r\n\
Date: Tue, 1 Jul 2025 10:00:00 +0000\r\n\
\r\n\
Please send the numbers.\r\n";
        let msg = parse_message(raw);
        assert_eq!(msg.message_id.as_deref(), Some("<abc@mail.test>"));
        assert_eq!(msg.sender, "Boss <boss@company.com>");
        assert_eq!(msg.subject, "Budget r\u{e9}view");
        assert!(msg.body.contains("Please send the numbers."));
        assert!(msg.date_epoch > 0);
    }

    #[test]
    fn prefers_plain_part_and_skips_attachments() {
        let raw = b"Subject: Mixed\r\n\
Content-Type: multipart/mixed; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
Content-Disposition: attachment; filename=\"notes.txt\"\r\n\
\r\n\
attached notes\r\n\
--b\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>Hello <b>there</b></p>\r\n\
--b--\r\n";
        let msg = parse_message(raw);
        assert!(msg.body.contains("Hello"));
        assert!(!msg.body.contains("attached notes"));
        assert!(!msg.body.contains("<p>"));
        assert_eq!(msg.message_id, None);
    }

    #[test]
    fn snippet_is_single_line_and_bounded() {
        let s = normalize_snippet("first line\n\n  second line  \nthird", 15);
        assert_eq!(s, "first line seco");
    }
}
