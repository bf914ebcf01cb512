//! Marlin line framing
//!
//! Hosts send `N<line> <command>*<checksum>`, where the checksum is the XOR
//! of every byte before `*`. Lines must be numbered consecutively. On a gap
//! or a bad checksum the printer asks for a resend of the next expected line
//! and drops everything else until that line arrives, so a single gap costs
//! exactly one resend request.

use bambulink_core::ProtocolError;

use crate::firmware::marlin::CommandEnvelope;

/// XOR checksum of a line body
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Frame a command the way a host does, e.g. `N1 M105*38`
pub fn frame(line_number: u32, command: &str) -> String {
    let body = format!("N{} {}", line_number, command);
    let sum = checksum(&body);
    format!("{}*{}", body, sum)
}

/// A line the protocol refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Reason printed after `Error:`
    pub error: ProtocolError,
    /// Line number to request with `Resend:`
    pub resend: Option<u32>,
}

/// What the protocol made of one inbound line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A command to translate and answer
    Command(CommandEnvelope),
    /// A line refused with an error reply
    Rejected(Rejection),
    /// A line dropped silently while a resend is outstanding
    Discarded {
        /// Line number that arrived.
        line_number: u32,
        /// Line number the printer is waiting for.
        expected: u32,
    },
    /// Blank or comment-only line, no reply
    Ignored,
}

/// Line numbering state for one session
#[derive(Debug, Clone, Default)]
pub struct LineProtocol {
    last_line: u32,
    resend_pending: Option<u32>,
}

impl LineProtocol {
    /// Fresh state, expecting `N1` next
    pub fn new() -> Self {
        Self::default()
    }

    /// Last accepted line number
    pub fn last_line(&self) -> u32 {
        self.last_line
    }

    /// Line number a resend was requested for, if still outstanding
    pub fn resend_pending(&self) -> Option<u32> {
        self.resend_pending
    }

    /// Process one raw line without its terminator
    pub fn accept(&mut self, raw: &str) -> Inbound {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            return Inbound::Ignored;
        }

        let numbered = line.starts_with(['N', 'n']);

        if !line.is_ascii() {
            let error = ProtocolError::Malformed {
                line: line.to_string(),
                reason: "non-ASCII characters".to_string(),
            };
            return self.reject(error, numbered);
        }

        let (body, checksum_field) = match line.rfind('*') {
            Some(star) => (&line[..star], Some(line[star + 1..].trim())),
            None => (line, None),
        };

        if let Some(field) = checksum_field {
            match field.parse::<u8>() {
                Ok(expected) if expected == checksum(body) => {}
                Ok(_) => {
                    let error = ProtocolError::ChecksumMismatch {
                        last_line: self.last_line,
                    };
                    return self.reject(error, true);
                }
                Err(_) => {
                    let error = ProtocolError::InvalidChecksum {
                        raw: field.to_string(),
                        last_line: self.last_line,
                    };
                    return self.reject(error, true);
                }
            }
        }

        let (line_number, command) = if numbered {
            let digits_end = body[1..]
                .find(|c: char| !c.is_ascii_digit())
                .map(|i| i + 1)
                .unwrap_or(body.len());
            match body[1..digits_end].parse::<u32>() {
                Ok(n) => (Some(n), body[digits_end..].trim()),
                Err(_) => {
                    let error = ProtocolError::InvalidLineNumber {
                        raw: body.split_whitespace().next().unwrap_or(body).to_string(),
                        last_line: self.last_line,
                    };
                    return self.reject(error, true);
                }
            }
        } else {
            (None, body.trim())
        };

        if command.is_empty() {
            let error = ProtocolError::MissingCommand {
                last_line: self.last_line,
            };
            return self.reject(error, line_number.is_some());
        }

        let envelope = match CommandEnvelope::parse(line_number, command) {
            Ok(envelope) => envelope,
            Err(error) => return self.reject(error, line_number.is_some()),
        };

        if envelope.code() == "M110" {
            let reset_to = envelope
                .int('N')
                .and_then(|n| u32::try_from(n).ok())
                .or(line_number)
                .unwrap_or(0);
            tracing::debug!("Line number reset to {}", reset_to);
            self.last_line = reset_to;
            self.resend_pending = None;
            return Inbound::Command(envelope);
        }

        if let Some(n) = line_number {
            let expected = self.last_line.wrapping_add(1);
            if n != expected {
                if self.resend_pending == Some(expected) {
                    tracing::trace!("Discarding N{} while waiting for N{}", n, expected);
                    return Inbound::Discarded {
                        line_number: n,
                        expected,
                    };
                }
                let error = ProtocolError::LineNumberMismatch {
                    last_line: self.last_line,
                    received: n,
                };
                return self.reject(error, true);
            }
            self.last_line = n;
            self.resend_pending = None;
        }

        Inbound::Command(envelope)
    }

    fn reject(&mut self, error: ProtocolError, request_resend: bool) -> Inbound {
        let resend = request_resend.then(|| self.last_line.wrapping_add(1));
        if resend.is_some() {
            self.resend_pending = resend;
        }
        Inbound::Rejected(Rejection { error, resend })
    }
}

/// Drop a `;` comment
fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(i) => &line[..i],
        None => line,
    }
}
