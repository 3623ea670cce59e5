//! Minimal line-oriented SIP message parsing: enough to read INVITE,
//! OPTIONS, BYE requests and to build responses and an outbound
//! REGISTER — not a general-purpose SIP stack.

use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub enum StartLine {
    Request { method: String, uri: String },
    Status { code: u16, reason: String },
}

#[derive(Debug, Clone)]
pub struct SipMessage {
    pub start_line: StartLine,
    /// Headers in arrival order aren't preserved (BTreeMap), which is
    /// fine: this bridge never needs to forward a message verbatim,
    /// only to read/write well-known fields.
    headers: BTreeMap<String, String>,
    pub body: String,
}

impl SipMessage {
    pub fn request(method: &str, uri: &str) -> Self {
        Self {
            start_line: StartLine::Request {
                method: method.to_string(),
                uri: uri.to_string(),
            },
            headers: BTreeMap::new(),
            body: String::new(),
        }
    }

    pub fn response(code: u16, reason: &str) -> Self {
        Self {
            start_line: StartLine::Status {
                code,
                reason: reason.to_string(),
            },
            headers: BTreeMap::new(),
            body: String::new(),
        }
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn method(&self) -> Option<&str> {
        match &self.start_line {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Status { .. } => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match &self.start_line {
            StartLine::Status { code, .. } => Some(*code),
            StartLine::Request { .. } => None,
        }
    }

    /// Parse a raw datagram into a `SipMessage`. Returns `None` on
    /// anything that isn't a well-formed start line.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut lines = raw.split("\r\n");
        let start = lines.next()?;

        let start_line = parse_start_line(start)?;

        let mut headers = BTreeMap::new();
        let mut body_lines = Vec::new();
        let mut in_body = false;

        for line in lines {
            if in_body {
                body_lines.push(line);
                continue;
            }
            if line.is_empty() {
                in_body = true;
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        Some(Self {
            start_line,
            headers,
            body: body_lines.join("\r\n"),
        })
    }

    pub fn encode(&self) -> String {
        let start_line = match &self.start_line {
            StartLine::Request { method, uri } => format!("{method} {uri} SIP/2.0"),
            StartLine::Status { code, reason } => format!("SIP/2.0 {code} {reason}"),
        };

        let mut out = String::new();
        out.push_str(&start_line);
        out.push_str("\r\n");
        for (name, value) in &self.headers {
            out.push_str(&capitalize_header(name));
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }
}

fn parse_start_line(line: &str) -> Option<StartLine> {
    if let Some(rest) = line.strip_prefix("SIP/2.0 ") {
        let mut parts = rest.splitn(2, ' ');
        let code: u16 = parts.next()?.parse().ok()?;
        let reason = parts.next().unwrap_or("").to_string();
        return Some(StartLine::Status { code, reason });
    }

    let mut parts = line.splitn(3, ' ');
    let method = parts.next()?.to_string();
    let uri = parts.next()?.to_string();
    let version = parts.next()?;
    if version != "SIP/2.0" {
        return None;
    }
    Some(StartLine::Request { method, uri })
}

fn capitalize_header(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_invite_request() {
        let raw = "INVITE sip:bridge@example.com SIP/2.0\r\nFrom: <sip:caller@example.com>\r\nCall-ID: abc123\r\n\r\n";
        let msg = SipMessage::parse(raw).unwrap();
        assert_eq!(msg.method(), Some("INVITE"));
        assert_eq!(msg.header("call-id"), Some("abc123"));
        assert_eq!(msg.header("Call-ID"), Some("abc123"));
    }

    #[test]
    fn parses_status_line() {
        let raw = "SIP/2.0 200 OK\r\nCall-ID: x\r\n\r\n";
        let msg = SipMessage::parse(raw).unwrap();
        assert_eq!(msg.status_code(), Some(200));
    }

    #[test]
    fn rejects_garbage() {
        assert!(SipMessage::parse("not a sip message").is_none());
    }

    #[test]
    fn encode_round_trips_method_and_headers() {
        let mut msg = SipMessage::request("OPTIONS", "sip:bridge@example.com");
        msg.set_header("Call-ID", "xyz");
        let encoded = msg.encode();
        let reparsed = SipMessage::parse(&encoded).unwrap();
        assert_eq!(reparsed.method(), Some("OPTIONS"));
        assert_eq!(reparsed.header("call-id"), Some("xyz"));
    }

    #[test]
    fn body_is_captured_after_blank_line() {
        let raw = "INVITE sip:x SIP/2.0\r\nContent-Length: 4\r\n\r\nSDP!";
        let msg = SipMessage::parse(raw).unwrap();
        assert_eq!(msg.body, "SDP!");
    }
}
