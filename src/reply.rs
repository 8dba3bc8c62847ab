//! Control-channel reply encoding
//!
//! Replies travel as `NNN SP text CRLF`. Multi-line replies are not used.

use crate::error::{FtpError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
  pub code: u16,
  pub text: String,
}

impl Reply {
  pub fn new(code: u16, text: impl Into<String>) -> Self {
    Self {
      code,
      text: text.into(),
    }
  }

  /// Encode for the wire, appending CRLF when the text does not carry one.
  pub fn to_wire(&self) -> String {
    let mut line = format!("{} {}", self.code, self.text);
    if !line.ends_with("\r\n") {
      line.push_str("\r\n");
    }
    line
  }
}

/// Parse a single reply line into code and text. Used by the client, which
/// frames replies by reading to the first CRLF.
pub fn parse_reply(line: &str) -> Result<Reply> {
  let line = line.trim_end_matches(['\r', '\n']);
  if line.len() < 3 || !line.as_bytes()[..3].iter().all(u8::is_ascii_digit) {
    return Err(FtpError::InvalidReply(line.to_string()));
  }
  let code = line[..3]
    .parse::<u16>()
    .map_err(|_| FtpError::InvalidReply(line.to_string()))?;
  let text = line[3..].trim_start().to_string();
  Ok(Reply { code, text })
}
