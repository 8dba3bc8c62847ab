use std::net::{Ipv4Addr, SocketAddrV4};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FtpCommand {
  USER(String),
  PASS(String),
  OPTS(String),
  TYPE(String),
  PASV,
  PORT(String),
  LIST(Option<String>),
  NLST(Option<String>),
  RETR(String),
  STOR(String),
  NOOP,
  QUIT,

  UNKNOWN(String),
}

fn empty_to_some(s: String) -> Option<String> {
  if s.is_empty() {
    None
  } else {
    Some(s)
  }
}

/// Split a framed control line into verb + argument. The verb is matched
/// case-insensitively; the argument keeps its spacing (OPTS and file names
/// may contain spaces).
pub fn parse_command(line: &str) -> FtpCommand {
  let line = line.trim();
  let (verb, arg) = match line.find(' ') {
    Some(pos) => (&line[..pos], line[pos + 1..].trim().to_string()),
    None => (line, String::new()),
  };
  match verb.to_ascii_uppercase().as_str() {
    "USER" => FtpCommand::USER(arg),
    "PASS" => FtpCommand::PASS(arg),
    "OPTS" => FtpCommand::OPTS(arg),
    "TYPE" => FtpCommand::TYPE(arg),
    "PASV" => FtpCommand::PASV,
    "PORT" => FtpCommand::PORT(arg),
    "LIST" => FtpCommand::LIST(empty_to_some(arg)),
    "NLST" => FtpCommand::NLST(empty_to_some(arg)),
    "RETR" => FtpCommand::RETR(arg),
    "STOR" => FtpCommand::STOR(arg),
    "NOOP" => FtpCommand::NOOP,
    "QUIT" => FtpCommand::QUIT,
    _ => FtpCommand::UNKNOWN(verb.to_ascii_uppercase()),
  }
}

/// Parse the `h1,h2,h3,h4,p1,p2` form shared by the PORT argument and the
/// PASV reply tuple. Port is reconstructed high byte first per RFC 959.
pub fn parse_host_port(arg: &str) -> Option<SocketAddrV4> {
  let mut parts = arg.split(',').map(|p| p.trim().parse::<u8>());
  let mut next = || parts.next()?.ok();
  let octets = [next()?, next()?, next()?, next()?];
  let p1 = next()? as u16;
  let p2 = next()? as u16;
  if arg.split(',').count() != 6 {
    return None;
  }
  let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
  Some(SocketAddrV4::new(ip, p1 * 256 + p2))
}

/// Render an endpoint as the six-byte comma tuple used by PASV replies.
pub fn format_host_port(addr: &SocketAddrV4) -> String {
  let [h1, h2, h3, h4] = addr.ip().octets();
  let port = addr.port();
  format!("{},{},{},{},{},{}", h1, h2, h3, h4, port >> 8, port & 0xFF)
}
