//! Text codec for encoding and decoding link protocol messages.
//!
//! Wire format:
//! ```text
//! <PREFIX> <SUBTYPE> [body...]
//! ```
//! Tokens are separated by any run of spaces, tabs or newlines.  Bodies that
//! carry several entries put one entry per line.  Characters are Latin-1
//! (one byte each) and a datagram never exceeds
//! [`MAX_DATAGRAM_SIZE`] bytes; there is no fragmentation.
//!
//! # Tolerance
//!
//! Decoding is strict about the prefix and sub-type (a mismatch is a
//! [`ProtocolError`]) but lenient inside status bodies: one bad entry is
//! recorded in [`StatusReport::rejected`] and the other lines still apply.

use thiserror::Error;
use tracing::trace;

use crate::domain::status::DeviceStatus;
use crate::protocol::messages::{
    tokens, Broadcast, ClientRequest, DeviceListing, DeviceReport, RejectedEntry, ResponseKind,
    ServerResponse, StatusEntry, StatusReport, MAX_DATAGRAM_SIZE,
};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The datagram held nothing but whitespace.
    #[error("empty message")]
    Empty,

    /// The first token is not the family prefix the receiver expected.
    #[error("expected {expected} message, got prefix {found:?}")]
    UnexpectedPrefix {
        expected: &'static str,
        found: String,
    },

    /// The sub-type after the prefix is unknown or not the one expected.
    #[error("unexpected {family} message type {found:?}")]
    UnexpectedKind {
        family: &'static str,
        found: String,
    },

    /// A device state token outside `UP`, `DOWN`, `CONNECTING`, `DISCONNECTING`.
    #[error("invalid status {0:?}")]
    InvalidStatus(String),

    /// The message structure is broken (missing or non-numeric field, etc.).
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A character outside the single-byte charset.
    #[error("character {0:?} cannot be encoded in one byte")]
    Unencodable(char),

    /// The encoded message would not fit in one datagram.
    #[error("message is {len} bytes, limit is {MAX_DATAGRAM_SIZE}")]
    TooLarge { len: usize },

    /// A name or description would break the framing if sent.
    #[error("invalid field: {0}")]
    InvalidField(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Converts wire text to bytes, one byte per character.
///
/// # Errors
///
/// Returns [`ProtocolError::Unencodable`] for characters above U+00FF and
/// [`ProtocolError::TooLarge`] when the result exceeds [`MAX_DATAGRAM_SIZE`].
pub fn encode_text(text: &str) -> Result<Vec<u8>, ProtocolError> {
    let bytes = text
        .chars()
        .map(|c| u8::try_from(u32::from(c)).map_err(|_| ProtocolError::Unencodable(c)))
        .collect::<Result<Vec<u8>, _>>()?;
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(ProtocolError::TooLarge { len: bytes.len() });
    }
    Ok(bytes)
}

/// Converts a received datagram to text.
///
/// Every byte maps to the character with the same code point, so decoding
/// never fails.  Leading and trailing control characters and whitespace
/// (including NUL padding) are trimmed.
pub fn decode_text(bytes: &[u8]) -> String {
    let text: String = bytes.iter().map(|&b| char::from(b)).collect();
    text.trim_matches(|c: char| c <= ' ').to_string()
}

/// Encodes a [`ClientRequest`] into a datagram payload.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidField`] if the device name is empty or
/// contains whitespace, or any error from [`encode_text`].
///
/// # Examples
///
/// ```rust
/// use link_core::{encode_request, ClientRequest};
///
/// let bytes = encode_request(&ClientRequest::Up("modem0".into())).unwrap();
/// assert_eq!(bytes, b"CLIENT UP modem0");
/// ```
pub fn encode_request(request: &ClientRequest) -> Result<Vec<u8>, ProtocolError> {
    if let Some(name) = request.device_name() {
        check_name(name)?;
    }
    encode_text(&request.to_string())
}

/// Decodes a [`ClientRequest`] (the server side of the exchange).
///
/// # Errors
///
/// Returns [`ProtocolError`] if the prefix is not `CLIENT`, the sub-type is
/// unknown, or a required device name is missing.
pub fn decode_request(bytes: &[u8]) -> Result<ClientRequest, ProtocolError> {
    let text = decode_text(bytes);
    let mut toks = Tokens::new(&text);
    let kind = expect_prefix(&mut toks, tokens::CLIENT)?;
    let name = toks.next_token().map(str::to_string);

    let named = |build: fn(String) -> ClientRequest| {
        name.clone()
            .map(build)
            .ok_or_else(|| ProtocolError::Malformed(format!("CLIENT {kind} needs a device name")))
    };

    match kind {
        tokens::PING => Ok(ClientRequest::Ping),
        tokens::DEVICES => Ok(ClientRequest::Devices),
        tokens::CLIENT_STATUS => Ok(ClientRequest::ClientStatus),
        tokens::STATUS => Ok(ClientRequest::Status(name.clone())),
        tokens::UP => named(ClientRequest::Up),
        tokens::DOWN => named(ClientRequest::Down),
        tokens::FORCE_DOWN => named(ClientRequest::ForceDown),
        other => Err(ProtocolError::UnexpectedKind {
            family: tokens::CLIENT,
            found: other.to_string(),
        }),
    }
}

/// Encodes a [`ServerResponse`] (used by servers and test peers).
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidField`] if a name or description would
/// break the line framing, or any error from [`encode_text`].
pub fn encode_response(response: &ServerResponse) -> Result<Vec<u8>, ProtocolError> {
    match response {
        ServerResponse::Devices(listings) => {
            for listing in listings {
                check_name(&listing.name)?;
                check_description(&listing.description)?;
            }
        }
        ServerResponse::Status(report) => check_report(report)?,
        ServerResponse::ClientStatus(names) => {
            for name in names {
                check_name(name)?;
            }
        }
    }
    encode_text(&response.to_string())
}

/// Decodes a unicast reply, insisting it is the `expected` kind.
///
/// # Errors
///
/// Returns [`ProtocolError::UnexpectedPrefix`] or
/// [`ProtocolError::UnexpectedKind`] when the reply is not `SERVER <expected>`.
pub fn decode_response(bytes: &[u8], expected: ResponseKind) -> Result<ServerResponse, ProtocolError> {
    parse_response(&decode_text(bytes), expected)
}

/// Parses already-decoded reply text.  See [`decode_response`].
///
/// # Errors
///
/// Same as [`decode_response`].
///
/// # Examples
///
/// ```rust
/// use link_core::{parse_response, ResponseKind, ServerResponse};
///
/// let reply = parse_response("SERVER CLIENT_STATUS modem0\tmodem2", ResponseKind::ClientStatus).unwrap();
/// assert_eq!(reply, ServerResponse::ClientStatus(vec!["modem0".into(), "modem2".into()]));
/// ```
pub fn parse_response(text: &str, expected: ResponseKind) -> Result<ServerResponse, ProtocolError> {
    let mut toks = Tokens::new(text);
    let kind = expect_prefix(&mut toks, tokens::SERVER)?;
    if kind != expected.token() {
        return Err(ProtocolError::UnexpectedKind {
            family: tokens::SERVER,
            found: kind.to_string(),
        });
    }

    let body = toks.rest();
    Ok(match expected {
        ResponseKind::Devices => ServerResponse::Devices(parse_listings(body)),
        ResponseKind::Status => ServerResponse::Status(parse_status_body(body)),
        ResponseKind::ClientStatus => ServerResponse::ClientStatus(
            body.split_whitespace().map(str::to_string).collect(),
        ),
    })
}

/// Encodes a [`Broadcast`] (used by servers and test peers).
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidField`] for unframeable device names, or
/// any error from [`encode_text`].
pub fn encode_broadcast(broadcast: &Broadcast) -> Result<Vec<u8>, ProtocolError> {
    if let Broadcast::Status(report) = broadcast {
        check_report(report)?;
    }
    encode_text(&broadcast.to_string())
}

/// Decodes a multicast datagram.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the prefix is not `BROADCAST` or the sub-type
/// is not `INIT`, `QUIT` or `STATUS`.  Bad entries inside a `STATUS` body do
/// not fail the decode; they land in [`StatusReport::rejected`].
///
/// # Examples
///
/// ```rust
/// use link_core::{decode_broadcast, Broadcast, DeviceReport};
///
/// let msg = decode_broadcast(b"BROADCAST STATUS modem0 Up 120 3").unwrap();
/// let Broadcast::Status(report) = msg else { panic!("not a status broadcast") };
/// assert_eq!(report.entries[0].report, DeviceReport::Up { connect_seconds: 120, users: 3 });
/// ```
pub fn decode_broadcast(bytes: &[u8]) -> Result<Broadcast, ProtocolError> {
    let text = decode_text(bytes);
    let mut toks = Tokens::new(&text);
    match expect_prefix(&mut toks, tokens::BROADCAST)? {
        tokens::INIT => Ok(Broadcast::Init),
        tokens::QUIT => Ok(Broadcast::Quit),
        tokens::STATUS => Ok(Broadcast::Status(parse_status_body(toks.rest()))),
        other => Err(ProtocolError::UnexpectedKind {
            family: tokens::BROADCAST,
            found: other.to_string(),
        }),
    }
}

// ── Tokenizer ─────────────────────────────────────────────────────────────────

/// Whitespace tokenizer that can hand back the untouched remainder.
struct Tokens<'a> {
    rest: &'a str,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text }
    }

    fn next_token(&mut self) -> Option<&'a str> {
        let trimmed = self.rest.trim_start();
        if trimmed.is_empty() {
            self.rest = trimmed;
            return None;
        }
        let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        let (token, rest) = trimmed.split_at(end);
        self.rest = rest;
        Some(token)
    }

    fn rest(&self) -> &'a str {
        self.rest
    }
}

fn expect_prefix<'a>(toks: &mut Tokens<'a>, prefix: &'static str) -> Result<&'a str, ProtocolError> {
    let first = toks.next_token().ok_or(ProtocolError::Empty)?;
    if first != prefix {
        return Err(ProtocolError::UnexpectedPrefix {
            expected: prefix,
            found: first.to_string(),
        });
    }
    toks.next_token().ok_or_else(|| ProtocolError::UnexpectedKind {
        family: prefix,
        found: String::new(),
    })
}

// ── Body parsing ──────────────────────────────────────────────────────────────

/// Parses `name<TAB>description` lines.  A line without a tab splits at the
/// first whitespace run instead.
fn parse_listings(body: &str) -> Vec<DeviceListing> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (name, description) = line
                .split_once('\t')
                .or_else(|| line.split_once(char::is_whitespace))
                .unwrap_or((line, ""));
            DeviceListing::new(name.trim(), description.trim())
        })
        .collect()
}

/// Parses status entries line by line.
///
/// Within a line entries are read sequentially (`name STATE [secs users]`),
/// so a bad state leaves no way to find the next entry on that line; the
/// rest of the line is abandoned and parsing resumes on the next one.
fn parse_status_body(body: &str) -> StatusReport {
    let mut report = StatusReport::default();
    for line in body.lines() {
        let mut toks = Tokens::new(line);
        while let Some(name) = toks.next_token() {
            match parse_entry(name, &mut toks) {
                Ok(entry) => report.entries.push(entry),
                Err(error) => {
                    trace!("rejecting status entry for {name}: {error}");
                    report.rejected.push(RejectedEntry {
                        name: Some(name.to_string()),
                        error,
                    });
                    break;
                }
            }
        }
    }
    report
}

fn parse_entry(name: &str, toks: &mut Tokens<'_>) -> Result<StatusEntry, ProtocolError> {
    let state = toks
        .next_token()
        .ok_or_else(|| ProtocolError::Malformed(format!("no state for device {name}")))?;

    let report = match DeviceStatus::from_wire(state) {
        Some(DeviceStatus::Up) => DeviceReport::Up {
            connect_seconds: parse_number(toks, name, "connect time")?,
            users: parse_number(toks, name, "user count")?,
        },
        Some(DeviceStatus::Down) => DeviceReport::Down,
        Some(DeviceStatus::Connecting) => DeviceReport::Connecting,
        Some(DeviceStatus::Disconnecting) => DeviceReport::Disconnecting,
        Some(DeviceStatus::Unknown) | None => {
            return Err(ProtocolError::InvalidStatus(state.to_string()))
        }
    };

    Ok(StatusEntry {
        name: name.to_string(),
        report,
    })
}

fn parse_number<T: std::str::FromStr>(
    toks: &mut Tokens<'_>,
    name: &str,
    what: &str,
) -> Result<T, ProtocolError> {
    let token = toks
        .next_token()
        .ok_or_else(|| ProtocolError::Malformed(format!("{what} missing for device {name}")))?;
    token
        .parse()
        .map_err(|_| ProtocolError::Malformed(format!("{what} {token:?} for device {name}")))
}

// ── Field validation ──────────────────────────────────────────────────────────

fn check_name(name: &str) -> Result<(), ProtocolError> {
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(ProtocolError::InvalidField(format!("device name {name:?}")));
    }
    Ok(())
}

fn check_description(description: &str) -> Result<(), ProtocolError> {
    if description.contains(['\t', '\n', '\r']) {
        return Err(ProtocolError::InvalidField(format!(
            "description {description:?}"
        )));
    }
    Ok(())
}

fn check_report(report: &StatusReport) -> Result<(), ProtocolError> {
    report.entries.iter().try_for_each(|entry| check_name(&entry.name))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
