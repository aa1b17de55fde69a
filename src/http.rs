//! HTTP message validation (RFC 9114 Section 4)
//!
//! Received header sections are checked field by field before each field
//! is handed to the application, then once more when the section ends.

use crate::error::{ErrorCode, Result};
use crate::types::HeaderField;

/// Headers that only make sense on a hop-by-hop HTTP/1.1 connection
const CONNECTION_SPECIFIC: [&[u8]; 5] = [
    b"connection",
    b"keep-alive",
    b"proxy-connection",
    b"transfer-encoding",
    b"upgrade",
];

const REQUEST_PSEUDO: [&[u8]; 5] = [b":method", b":scheme", b":authority", b":path", b":protocol"];
const RESPONSE_PSEUDO: [&[u8]; 1] = [b":status"];

/// Which kind of header section is being checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// Request headers (received by a server)
    Request,
    /// Response headers (received by a client)
    Response,
    /// Trailers in either direction
    Trailers,
}

/// Incremental checker for one header section
#[derive(Debug)]
pub struct SectionCheck {
    kind: SectionKind,
    regular_seen: bool,
    method: Option<Vec<u8>>,
    status: Option<u16>,
    seen_pseudo: Vec<&'static [u8]>,
    content_length: Option<u64>,
}

/// What a completed section told us about the message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionSummary {
    /// `:status` of a response
    pub status: Option<u16>,
    /// Declared `content-length`
    pub content_length: Option<u64>,
    /// Request used CONNECT
    pub is_connect: bool,
}

impl SectionSummary {
    /// Informational response that a final response will follow
    pub fn is_interim(&self) -> bool {
        matches!(self.status, Some(s) if (100..200).contains(&s) && s != 101)
    }
}

impl SectionCheck {
    /// Start checking a section
    pub fn new(kind: SectionKind) -> Self {
        Self {
            kind,
            regular_seen: false,
            method: None,
            status: None,
            seen_pseudo: Vec::new(),
            content_length: None,
        }
    }

    /// Check one field
    pub fn field(&mut self, field: &HeaderField) -> Result<()> {
        let name = field.name.as_slice();
        let value = field.value.as_slice();

        if name.is_empty() {
            return Err(ErrorCode::MalformedHttpHeader.into());
        }
        if value.iter().any(|&b| b == b'\0' || b == b'\r' || b == b'\n') {
            return Err(ErrorCode::MalformedHttpHeader.into());
        }

        if name[0] == b':' {
            return self.pseudo(name, value);
        }
        self.regular_seen = true;

        if !name.iter().all(|&b| is_token_lower(b)) {
            return Err(ErrorCode::MalformedHttpHeader.into());
        }
        if CONNECTION_SPECIFIC.iter().any(|&h| h == name) {
            return Err(ErrorCode::MalformedHttpHeader.into());
        }
        if name == b"te" && value != b"trailers" {
            return Err(ErrorCode::MalformedHttpHeader.into());
        }
        if name == b"content-length" && self.kind != SectionKind::Trailers {
            let parsed = parse_content_length(value)?;
            match self.content_length {
                Some(existing) if existing != parsed => {
                    return Err(ErrorCode::MalformedHttpMessaging.into());
                }
                _ => self.content_length = Some(parsed),
            }
        }
        Ok(())
    }

    fn pseudo(&mut self, name: &[u8], value: &[u8]) -> Result<()> {
        if self.regular_seen || self.kind == SectionKind::Trailers {
            return Err(ErrorCode::MalformedHttpMessaging.into());
        }

        let allowed: &[&'static [u8]] = match self.kind {
            SectionKind::Request => &REQUEST_PSEUDO,
            SectionKind::Response => &RESPONSE_PSEUDO,
            SectionKind::Trailers => &[],
        };
        let Some(&known) = allowed.iter().find(|&&p| p == name) else {
            return Err(ErrorCode::MalformedHttpMessaging.into());
        };
        if self.seen_pseudo.contains(&known) {
            return Err(ErrorCode::MalformedHttpMessaging.into());
        }
        self.seen_pseudo.push(known);

        match known {
            b":method" => {
                if value.is_empty() || !value.iter().all(|&b| b.is_ascii_alphanumeric() || b == b'-') {
                    return Err(ErrorCode::MalformedHttpMessaging.into());
                }
                self.method = Some(value.to_vec());
            }
            b":path" if value.is_empty() => {
                return Err(ErrorCode::MalformedHttpMessaging.into());
            }
            b":status" => {
                if value.len() != 3 || !value.iter().all(u8::is_ascii_digit) {
                    return Err(ErrorCode::MalformedHttpMessaging.into());
                }
                let status = value
                    .iter()
                    .fold(0u16, |acc, &d| acc * 10 + (d - b'0') as u16);
                self.status = Some(status);
            }
            _ => {}
        }
        Ok(())
    }

    /// Check that the completed section is a whole message head
    pub fn finish(self) -> Result<SectionSummary> {
        match self.kind {
            SectionKind::Request if self.method.is_none() => {
                Err(ErrorCode::MalformedHttpMessaging.into())
            }
            SectionKind::Response if self.status.is_none() => {
                Err(ErrorCode::MalformedHttpMessaging.into())
            }
            _ => Ok(SectionSummary {
                status: self.status,
                content_length: self.content_length,
                is_connect: self.method.as_deref() == Some(b"CONNECT".as_slice()),
            }),
        }
    }
}

fn is_token_lower(b: u8) -> bool {
    matches!(b,
        b'a'..=b'z' | b'0'..=b'9'
        | b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
        | b'^' | b'_' | b'`' | b'|' | b'~')
}

fn parse_content_length(value: &[u8]) -> Result<u64> {
    if value.is_empty() || value.len() > 19 || !value.iter().all(u8::is_ascii_digit) {
        return Err(ErrorCode::MalformedHttpMessaging.into());
    }
    Ok(value.iter().fold(0u64, |acc, &d| acc * 10 + (d - b'0') as u64))
}
