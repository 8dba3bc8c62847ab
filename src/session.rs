//! Per-client session: authentication lifecycle, transfer sub-state, and the
//! control-channel command loop.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::channel::PendingData;
use crate::commands::{parse_command, FtpCommand};
use crate::error::{FtpError, Result};
use crate::fsview::FsView;
use crate::handlers::FtpHandlers;
use crate::reply::Reply;

pub const USERNAME_MAX_LENGTH: usize = 25;

/// A wedged client is cut loose after this long without a command.
const CONTROL_IDLE_DEADLINE: Duration = Duration::from_secs(300);

/// The credential a client must present to gain full access.
#[derive(Debug, Clone)]
pub struct Credentials {
  pub user: String,
  pub pass: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessLevel {
  Unknown,
  NotLoggedIn,
  ReadOnly,
  CreateNew,
  Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
  Ascii,
  Image,
}

#[derive(Debug)]
pub struct Session {
  reader: BufReader<OwnedReadHalf>,
  writer: OwnedWriteHalf,
  pub(crate) peer_addr: SocketAddr,
  pub(crate) local_addr: SocketAddr,
  pub(crate) creds: Credentials,
  pub(crate) user_name: String,
  pub(crate) access: AccessLevel,
  pub(crate) transfer_type: TransferType,
  pub(crate) fs: FsView,
  pub(crate) pending_data: Option<PendingData>,
}

impl Session {
  pub fn new(socket: TcpStream, fs: FsView, creds: Credentials) -> Result<Self> {
    let peer_addr = socket.peer_addr()?;
    let local_addr = socket.local_addr()?;
    let (rd, wr) = socket.into_split();
    Ok(Self {
      reader: BufReader::new(rd),
      writer: wr,
      peer_addr,
      local_addr,
      creds,
      user_name: String::new(),
      access: AccessLevel::Unknown,
      transfer_type: TransferType::Ascii,
      fs,
      pending_data: None,
    })
  }

  /// Drive the command loop until the client quits, disconnects, or the
  /// control channel fails. All owned sockets are released on every path.
  pub async fn run(mut self) -> Result<()> {
    self.send_reply(220, "FTP Server Ready").await?;

    let mut buf = Vec::with_capacity(512);
    loop {
      buf.clear();
      let n = match timeout(CONTROL_IDLE_DEADLINE, self.reader.read_until(b'\n', &mut buf)).await {
        Ok(read) => read?,
        Err(_) => return Err(FtpError::Timeout),
      };
      if n == 0 {
        debug!(peer = %self.peer_addr, "control connection closed by peer");
        return Ok(());
      }
      if !buf.ends_with(b"\r\n") {
        warn!(peer = %self.peer_addr, "discarding control line without CRLF terminator");
        continue;
      }

      let line = String::from_utf8_lossy(&buf).to_string();
      let cmd = parse_command(&line);
      debug!(peer = %self.peer_addr, ?cmd, "command received");

      if !self.dispatch(cmd).await? {
        return Ok(());
      }
    }
  }

  /// Route one parsed command to its handler. Authentication gating lives
  /// here so every handler below the gate can assume a logged-in client.
  async fn dispatch(&mut self, cmd: FtpCommand) -> Result<bool> {
    match cmd {
      FtpCommand::USER(arg) => self.user(arg).await,
      FtpCommand::PASS(arg) => self.pass(arg).await,
      FtpCommand::OPTS(arg) => self.opts(arg).await,
      FtpCommand::NOOP => self.noop().await,
      FtpCommand::QUIT => self.quit().await,
      FtpCommand::UNKNOWN(verb) => self.unknown(verb).await,
      _ if !self.logged_in() => {
        self.send_reply(530, "Please login with user and pass.").await?;
        Ok(true)
      }
      FtpCommand::TYPE(arg) => self.set_type(arg).await,
      FtpCommand::PASV => self.pasv().await,
      FtpCommand::PORT(arg) => self.port(arg).await,
      // NLST gets identical handling
      FtpCommand::LIST(dir) | FtpCommand::NLST(dir) => self.list(dir).await,
      FtpCommand::RETR(name) => self.retr(name).await,
      FtpCommand::STOR(name) => self.stor(name).await,
    }
  }

  pub(crate) fn logged_in(&self) -> bool {
    self.access >= AccessLevel::ReadOnly
  }

  pub(crate) fn can_write(&self) -> bool {
    self.access >= AccessLevel::CreateNew
  }

  pub(crate) fn type_name(&self) -> &'static str {
    match self.transfer_type {
      TransferType::Ascii => "ASCII",
      TransferType::Image => "BINARY",
    }
  }

  pub(crate) async fn send_reply(&mut self, code: u16, text: impl Into<String>) -> Result<()> {
    let reply = Reply::new(code, text);
    self.writer.write_all(reply.to_wire().as_bytes()).await?;
    Ok(())
  }
}
