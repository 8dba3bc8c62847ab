//! Command semantics for the verbs the server speaks.
//!
//! Every handler replies with a numbered code and returns `Ok(true)` to keep
//! the session alive, `Ok(false)` to end it. Control-channel write failures
//! propagate as `Err` and tear the session down; everything else is recovered
//! here with the appropriate reply.

use async_trait::async_trait;
use std::net::{IpAddr, SocketAddrV4};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};

use crate::channel::{bind_passive, PendingData};
use crate::commands::{format_host_port, parse_host_port};
use crate::error::Result;
use crate::session::{AccessLevel, Session, TransferType, USERNAME_MAX_LENGTH};

const STREAM_BLOCK: usize = 8192;

#[async_trait]
pub trait FtpHandlers {
  async fn user(&mut self, name: String) -> Result<bool>;
  async fn pass(&mut self, password: String) -> Result<bool>;
  async fn opts(&mut self, option: String) -> Result<bool>;
  async fn set_type(&mut self, type_code: String) -> Result<bool>;
  async fn pasv(&mut self) -> Result<bool>;
  async fn port(&mut self, host_port: String) -> Result<bool>;
  async fn list(&mut self, dir: Option<String>) -> Result<bool>;
  async fn retr(&mut self, file_name: String) -> Result<bool>;
  async fn stor(&mut self, file_name: String) -> Result<bool>;
  async fn noop(&mut self) -> Result<bool>;
  async fn quit(&mut self) -> Result<bool>;
  async fn unknown(&mut self, verb: String) -> Result<bool>;
}

#[async_trait]
impl FtpHandlers for Session {
  async fn user(&mut self, name: String) -> Result<bool> {
    if name.is_empty() || name.len() > USERNAME_MAX_LENGTH {
      self.send_reply(501, "Syntax error in parameters or arguments.").await?;
      return Ok(true);
    }
    self.user_name = name.clone();
    self.access = AccessLevel::NotLoggedIn;
    self.send_reply(331, format!("User {} OK. Password required", name)).await?;
    Ok(true)
  }

  async fn pass(&mut self, password: String) -> Result<bool> {
    if password.is_empty() {
      self.send_reply(501, "Pass command with syntax error.").await?;
      return Ok(true);
    }
    if self.user_name.is_empty()
      || self.user_name != self.creds.user
      || password != self.creds.pass
    {
      self.send_reply(530, "Invalid username or password").await?;
      return Ok(true);
    }
    self.access = AccessLevel::Full;
    info!(peer = %self.peer_addr, user = %self.user_name, "user logged in");
    self.send_reply(230, "User logged in.").await?;
    Ok(true)
  }

  async fn opts(&mut self, option: String) -> Result<bool> {
    if option.eq_ignore_ascii_case("UTF8 ON") {
      self.send_reply(200, "UTF8 mode enabled").await?;
    } else {
      self.send_reply(501, "Opts command with syntax error.").await?;
    }
    Ok(true)
  }

  async fn set_type(&mut self, type_code: String) -> Result<bool> {
    // only the leading letter counts; bytes are streamed verbatim either way
    match type_code.chars().next() {
      Some('A') | Some('a') => {
        self.transfer_type = TransferType::Ascii;
        self.send_reply(200, "Type set to A.").await?;
      }
      Some('I') | Some('i') => {
        self.transfer_type = TransferType::Image;
        self.send_reply(200, "Type set to I.").await?;
      }
      _ => {
        self.send_reply(501, "Syntax error in parameters or arguments.").await?;
      }
    }
    Ok(true)
  }

  async fn pasv(&mut self) -> Result<bool> {
    // supersede any previously prepared channel
    self.pending_data = None;

    let ip = match self.local_addr.ip() {
      IpAddr::V4(ip) => ip,
      IpAddr::V6(_) => {
        self.send_reply(451, "Requested action aborted. Local error in processing.").await?;
        return Ok(true);
      }
    };
    let (listener, port) = match bind_passive().await {
      Ok(bound) => bound,
      Err(e) => {
        warn!(peer = %self.peer_addr, error = %e, "passive bind failed");
        self.send_reply(451, "Requested action aborted. Local error in processing.").await?;
        return Ok(true);
      }
    };
    let tuple = format_host_port(&SocketAddrV4::new(ip, port));
    self.pending_data = Some(PendingData::Passive { listener, port });
    self.send_reply(227, format!("Entering Passive Mode ({}).", tuple)).await?;
    Ok(true)
  }

  async fn port(&mut self, host_port: String) -> Result<bool> {
    if host_port.is_empty() {
      self.send_reply(501, "Syntax error in parameters or arguments.").await?;
      return Ok(true);
    }
    let peer = match parse_host_port(&host_port) {
      Some(peer) => peer,
      None => {
        self.send_reply(501, "Syntax error in parameters or arguments.").await?;
        return Ok(true);
      }
    };
    // anti-bounce: the advertised IP must be the control peer itself
    if IpAddr::V4(*peer.ip()) != self.peer_addr.ip() {
      warn!(peer = %self.peer_addr, advertised = %peer, "PORT address does not match control peer");
      self.send_reply(501, "Syntax error in parameters or arguments.").await?;
      return Ok(true);
    }
    self.pending_data = Some(PendingData::Active { peer });
    self.send_reply(200, "PORT command successful.").await?;
    Ok(true)
  }

  async fn list(&mut self, dir: Option<String>) -> Result<bool> {
    let target = match dir.as_deref() {
      None => self.fs.cwd().to_path_buf(),
      // ls-style flags are tolerated and ignored
      Some(arg) if arg.starts_with("-a") || arg.starts_with("-1") => self.fs.cwd().to_path_buf(),
      Some(arg) => match self.fs.resolve(arg) {
        Ok(path) => path,
        Err(_) => {
          self.send_reply(501, "Syntax error in parameters or arguments.").await?;
          return Ok(true);
        }
      },
    };

    // a transfer command consumes the negotiation even when it fails below
    let pending = match self.pending_data.take() {
      Some(pending) => pending,
      None => {
        self.send_reply(425, "Can't open data connection.").await?;
        return Ok(true);
      }
    };

    let listing = match self.fs.list_dir(&target) {
      Ok(listing) => listing,
      Err(_) => {
        self.send_reply(550, "File or directory unavailable.").await?;
        return Ok(true);
      }
    };

    self.send_reply(150, "Opening ASCII mode data connection for file list.").await?;
    let mut data = match pending.open().await {
      Ok(data) => data,
      Err(_) => {
        self.send_reply(451, "Requested action aborted. Local error in processing.").await?;
        return Ok(true);
      }
    };

    if data.write_all(listing.as_bytes()).await.is_err() {
      self.send_reply(451, "Requested action aborted. Local error in processing.").await?;
      return Ok(true);
    }
    data.shutdown().await.ok();

    self.send_reply(226, "Transfer complete.").await?;
    Ok(true)
  }

  async fn retr(&mut self, file_name: String) -> Result<bool> {
    if file_name.is_empty() {
      self.send_reply(501, "Syntax error in parameters or arguments.").await?;
      return Ok(true);
    }
    let resolved = match self.fs.resolve(&file_name) {
      Ok(path) => path,
      Err(_) => {
        self.send_reply(550, "File or directory unavailable.").await?;
        return Ok(true);
      }
    };
    let pending = match self.pending_data.take() {
      Some(pending) => pending,
      None => {
        self.send_reply(425, "Can't open data connection.").await?;
        return Ok(true);
      }
    };

    let found = resolved
      .parent()
      .zip(resolved.file_name())
      .and_then(|(dir, name)| self.fs.find_file(dir, &name.to_string_lossy()));
    let path = match found {
      Some(path) => path,
      None => {
        self.send_reply(550, "File not found.").await?;
        return Ok(true);
      }
    };
    let mut file = match tokio::fs::File::open(&path).await {
      Ok(file) => file,
      Err(_) => {
        self.send_reply(550, "File or directory unavailable.").await?;
        return Ok(true);
      }
    };

    let opening = format!(
      "Opening {} mode data connection for {}.",
      self.type_name(),
      file_name
    );
    self.send_reply(150, opening).await?;
    let mut data = match pending.open().await {
      Ok(data) => data,
      Err(_) => {
        self.send_reply(451, "Requested action aborted. Local error in processing.").await?;
        return Ok(true);
      }
    };

    let mut buf = vec![0u8; STREAM_BLOCK];
    loop {
      let n = match file.read(&mut buf).await {
        Ok(0) => break,
        Ok(n) => n,
        Err(_) => {
          self.send_reply(451, "Requested action aborted. Local error in processing.").await?;
          return Ok(true);
        }
      };
      if data.write_all(&buf[..n]).await.is_err() {
        warn!(peer = %self.peer_addr, file = %path.display(), "send failed mid-transfer");
        self.send_reply(426, "Connection closed; transfer aborted.").await?;
        return Ok(true);
      }
    }
    data.shutdown().await.ok();

    info!(peer = %self.peer_addr, file = %path.display(), "file sent");
    self.send_reply(226, "Transfer complete.").await?;
    Ok(true)
  }

  async fn stor(&mut self, file_name: String) -> Result<bool> {
    if !self.can_write() {
      self.send_reply(550, "Permission denied.").await?;
      return Ok(true);
    }
    if file_name.is_empty() {
      self.send_reply(501, "Syntax error in parameters or arguments.").await?;
      return Ok(true);
    }
    let path = match self.fs.resolve(&file_name) {
      Ok(path) => path,
      Err(_) => {
        self.send_reply(550, "File or directory unavailable.").await?;
        return Ok(true);
      }
    };
    let pending = match self.pending_data.take() {
      Some(pending) => pending,
      None => {
        self.send_reply(425, "Can't open data connection.").await?;
        return Ok(true);
      }
    };

    let mut file = match tokio::fs::File::create(&path).await {
      Ok(file) => file,
      Err(_) => {
        self.send_reply(550, "File or directory unavailable.").await?;
        return Ok(true);
      }
    };

    let opening = format!(
      "Opening {} mode data connection for {}.",
      self.type_name(),
      file_name
    );
    self.send_reply(150, opening).await?;
    let mut data = match pending.open().await {
      Ok(data) => data,
      Err(_) => {
        self.send_reply(451, "Requested action aborted. Local error in processing.").await?;
        return Ok(true);
      }
    };

    let mut buf = vec![0u8; STREAM_BLOCK];
    loop {
      let n = match data.read(&mut buf).await {
        Ok(0) => break,
        Ok(n) => n,
        Err(_) => {
          warn!(peer = %self.peer_addr, file = %path.display(), "receive failed mid-transfer");
          self.send_reply(426, "Connection closed; transfer aborted.").await?;
          return Ok(true);
        }
      };
      if file.write_all(&buf[..n]).await.is_err() {
        self.send_reply(451, "Requested action aborted. Local error in processing.").await?;
        return Ok(true);
      }
    }
    if file.flush().await.is_err() {
      self.send_reply(451, "Requested action aborted. Local error in processing.").await?;
      return Ok(true);
    }

    info!(peer = %self.peer_addr, file = %path.display(), "file stored");
    self.send_reply(226, "Transfer complete.").await?;
    Ok(true)
  }

  async fn noop(&mut self) -> Result<bool> {
    self.send_reply(200, "NOOP ok.").await?;
    Ok(true)
  }

  async fn quit(&mut self) -> Result<bool> {
    self.send_reply(221, "Goodbye.").await?;
    Ok(false)
  }

  async fn unknown(&mut self, verb: String) -> Result<bool> {
    warn!(peer = %self.peer_addr, verb = %verb, "unsupported command");
    self.send_reply(502, "Command not implemented.").await?;
    Ok(true)
  }
}
