//! Parsed G-code command lines
//!
//! A [`CommandEnvelope`] is one command after line-number and checksum
//! framing has been removed. Commands taking free text (`M23 file.gcode`,
//! `M117 hello`) keep the remainder of the line instead of word arguments.

use bambulink_core::ProtocolError;

/// Codes whose parameter is the rest of the line
const TEXT_COMMANDS: &[&str] = &["M23", "M28", "M30", "M32", "M117", "M118"];

/// One G-code word argument such as `S200` or a bare flag such as `L`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    /// Upper-cased parameter letter
    pub letter: char,
    /// Raw value text, `None` for bare flags
    pub value: Option<String>,
}

/// A single parsed G-code line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEnvelope {
    line_number: Option<u32>,
    code: String,
    args: Vec<Argument>,
    text: String,
}

impl CommandEnvelope {
    /// Parse the command part of a line (without `N` prefix or `*` suffix)
    pub fn parse(line_number: Option<u32>, command: &str) -> Result<Self, ProtocolError> {
        let command = command.trim();
        let malformed = |reason: &str| ProtocolError::Malformed {
            line: command.to_string(),
            reason: reason.to_string(),
        };

        let first = match command.chars().next() {
            Some(c) if c.is_ascii_alphabetic() => c.to_ascii_uppercase(),
            Some(_) => return Err(malformed("command must start with a letter")),
            None => return Err(malformed("empty command")),
        };

        let code_end = command[1..]
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .map(|i| i + 1)
            .unwrap_or(command.len());

        let code = if code_end == 1 {
            // Not a G-code word, keep the whole token so it can be acknowledged
            let token_end = command.find(char::is_whitespace).unwrap_or(command.len());
            command[..token_end].to_ascii_uppercase()
        } else {
            let number = &command[1..code_end];
            let number = number.trim_start_matches('0');
            let number = if number.is_empty() || number.starts_with('.') {
                format!("0{}", number)
            } else {
                number.to_string()
            };
            format!("{}{}", first, number)
        };

        let rest_start = if code_end == 1 {
            code.len()
        } else {
            code_end
        };
        let text = command[rest_start..].trim().to_string();

        let args = if TEXT_COMMANDS.contains(&code.as_str()) {
            Vec::new()
        } else {
            parse_arguments(&text).map_err(|reason| malformed(&reason))?
        };

        Ok(Self {
            line_number,
            code,
            args,
            text,
        })
    }

    /// Line number the host attached, if any
    pub fn line_number(&self) -> Option<u32> {
        self.line_number
    }

    /// Normalized command code, e.g. `M105` or `G1`
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Word arguments in order
    pub fn args(&self) -> &[Argument] {
        &self.args
    }

    /// Everything after the code, trimmed
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The command as it would be sent to the printer, without framing
    pub fn command_line(&self) -> String {
        if self.text.is_empty() {
            self.code.clone()
        } else {
            format!("{} {}", self.code, self.text)
        }
    }

    /// Whether a parameter letter is present
    pub fn has(&self, letter: char) -> bool {
        self.arg(letter).is_some()
    }

    /// The argument for a letter
    pub fn arg(&self, letter: char) -> Option<&Argument> {
        let letter = letter.to_ascii_uppercase();
        self.args.iter().find(|a| a.letter == letter)
    }

    /// Numeric value of a parameter
    pub fn float(&self, letter: char) -> Option<f64> {
        self.arg(letter)?.value.as_deref()?.parse().ok()
    }

    /// Integer value of a parameter, truncating decimals
    pub fn int(&self, letter: char) -> Option<i64> {
        self.float(letter).map(|v| v as i64)
    }
}

fn parse_arguments(text: &str) -> Result<Vec<Argument>, String> {
    let mut args = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_whitespace() {
            continue;
        }
        if !c.is_ascii_alphabetic() {
            return Err(format!("unexpected '{}' where a parameter letter was expected", c));
        }

        let mut value = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_whitespace() || next.is_ascii_alphabetic() {
                break;
            }
            value.push(next);
            chars.next();
        }

        args.push(Argument {
            letter: c.to_ascii_uppercase(),
            value: (!value.is_empty()).then_some(value),
        });
    }

    Ok(args)
}
