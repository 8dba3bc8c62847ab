//! Interactive FTP client.
//!
//! Owns a control socket and, per transfer, a data socket. Every transfer
//! negotiates PASV first, dials the advertised endpoint, then issues the
//! transfer verb on the control channel. Replies are framed by reading to
//! the first CRLF, which is sufficient for this server's single-line replies.

use std::net::SocketAddrV4;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::commands::parse_host_port;
use crate::error::{FtpError, Result};
use crate::reply::{parse_reply, Reply};

const DEFAULT_PORT: u16 = 21;
const MAX_REPLY_LINE: usize = 4096;

pub struct FtpClient {
  control: Option<TcpStream>,
}

impl FtpClient {
  pub fn new() -> Self {
    Self { control: None }
  }

  pub fn is_connected(&self) -> bool {
    self.control.is_some()
  }

  pub async fn connect(&mut self, host: &str, port: u16) -> Result<Reply> {
    let stream = TcpStream::connect(format!("{}:{}", host, port)).await?;
    self.control = Some(stream);
    self.read_reply().await
  }

  pub async fn login_user(&mut self, name: &str) -> Result<Reply> {
    self.command_reply(&format!("USER {}", name)).await
  }

  pub async fn login_pass(&mut self, password: &str) -> Result<Reply> {
    self.command_reply(&format!("PASS {}", password)).await
  }

  pub async fn set_type(&mut self, type_code: char) -> Result<Reply> {
    self.command_reply(&format!("TYPE {}", type_code)).await
  }

  /// LIST over a fresh passive data connection; returns the listing text.
  pub async fn list(&mut self) -> Result<String> {
    let mut data = self.enter_passive().await?;
    let opening = self.command_reply("LIST").await?;
    if opening.code != 150 {
      return Err(reply_error(opening));
    }
    let mut listing = String::new();
    data.read_to_string(&mut listing).await?;
    drop(data);
    let closing = self.read_reply().await?;
    if closing.code != 226 {
      return Err(reply_error(closing));
    }
    Ok(listing)
  }

  /// RETR `remote` into the local file at `local`; returns bytes received.
  pub async fn get(&mut self, remote: &str, local: &Path) -> Result<u64> {
    let mut data = self.enter_passive().await?;
    let opening = self.command_reply(&format!("RETR {}", remote)).await?;
    if opening.code != 150 {
      return Err(reply_error(opening));
    }
    let mut file = tokio::fs::File::create(local).await?;
    let copied = tokio::io::copy(&mut data, &mut file).await?;
    file.flush().await?;
    drop(data);
    let closing = self.read_reply().await?;
    if closing.code != 226 {
      return Err(reply_error(closing));
    }
    Ok(copied)
  }

  /// STOR the local file at `local` as `remote`; returns bytes sent.
  pub async fn put(&mut self, local: &Path, remote: &str) -> Result<u64> {
    let mut file = tokio::fs::File::open(local).await?;
    let mut data = self.enter_passive().await?;
    let opening = self.command_reply(&format!("STOR {}", remote)).await?;
    if opening.code != 150 {
      return Err(reply_error(opening));
    }
    let copied = tokio::io::copy(&mut file, &mut data).await?;
    data.shutdown().await?;
    drop(data);
    let closing = self.read_reply().await?;
    if closing.code != 226 {
      return Err(reply_error(closing));
    }
    Ok(copied)
  }

  /// QUIT and drop the control socket. The goodbye reply is skipped when the
  /// caller is exiting anyway.
  pub async fn disconnect(&mut self, wait_for_reply: bool) -> Result<Option<Reply>> {
    self.send_command("QUIT").await?;
    let reply = if wait_for_reply {
      Some(self.read_reply().await?)
    } else {
      None
    };
    self.control = None;
    Ok(reply)
  }

  /// Negotiate PASV and dial the advertised endpoint on a fresh data socket.
  async fn enter_passive(&mut self) -> Result<TcpStream> {
    let reply = self.command_reply("PASV").await?;
    if reply.code != 227 {
      return Err(reply_error(reply));
    }
    let endpoint = parse_pasv_endpoint(&reply.text)
      .ok_or_else(|| FtpError::InvalidReply(reply.text.clone()))?;
    debug!(%endpoint, "dialing passive endpoint");
    Ok(TcpStream::connect(endpoint).await?)
  }

  async fn command_reply(&mut self, line: &str) -> Result<Reply> {
    self.send_command(line).await?;
    self.read_reply().await
  }

  async fn send_command(&mut self, line: &str) -> Result<()> {
    let control = self.control.as_mut().ok_or(FtpError::ConnectionClosed)?;
    control.write_all(format!("{}\r\n", line).as_bytes()).await?;
    Ok(())
  }

  async fn read_reply(&mut self) -> Result<Reply> {
    let control = self.control.as_mut().ok_or(FtpError::ConnectionClosed)?;
    let mut line = Vec::with_capacity(128);
    loop {
      let byte = match control.read_u8().await {
        Ok(byte) => byte,
        Err(_) => return Err(FtpError::ConnectionClosed),
      };
      line.push(byte);
      if line.ends_with(b"\r\n") {
        break;
      }
      if line.len() > MAX_REPLY_LINE {
        return Err(FtpError::InvalidReply(String::from_utf8_lossy(&line).to_string()));
      }
    }
    parse_reply(&String::from_utf8_lossy(&line))
  }
}

impl Default for FtpClient {
  fn default() -> Self {
    Self::new()
  }
}

fn reply_error(reply: Reply) -> FtpError {
  FtpError::Reply {
    code: reply.code,
    message: reply.text,
  }
}

/// Pull the `(h1,h2,h3,h4,p1,p2)` tuple out of a 227 reply text.
fn parse_pasv_endpoint(text: &str) -> Option<SocketAddrV4> {
  let start = text.find('(')? + 1;
  let end = text.find(')')?;
  parse_host_port(text.get(start..end)?)
}

const HELP_TEXT: &str = "Available commands:
  connect <ip> [port]    - Connect to the FTP server
  user <username>        - Send username
  pass <password>        - Send password
  binary                 - Set image (binary) transfer type
  ascii                  - Set ASCII transfer type
  list                   - List files in the current directory
  get <remote> <local>   - Download a file
  put <local> <remote>   - Upload a file
  disconnect             - Disconnect from the FTP server
  quit                   - Exit the client
  help                   - Show this help";

fn print_reply(reply: &Reply) {
  println!("{} {}", reply.code, reply.text);
}

fn print_error(e: &FtpError) {
  eprintln!("Error: {}", e);
}

/// The read-eval loop behind the `oxftp` binary.
pub async fn run_repl() -> Result<()> {
  use tokio::io::AsyncBufReadExt;

  let mut client = FtpClient::new();
  let mut lines = BufReader::new(tokio::io::stdin()).lines();

  println!("FTP client started. Type 'help' for available commands.");
  loop {
    {
      use std::io::Write;
      print!("FTP >> ");
      std::io::stdout().flush()?;
    }
    let line = match lines.next_line().await? {
      Some(line) => line,
      None => break,
    };
    let mut words = line.split_whitespace();
    let action = match words.next() {
      Some(action) => action.to_ascii_lowercase(),
      None => continue,
    };
    let args: Vec<&str> = words.collect();

    let needs_connection = matches!(
      action.as_str(),
      "user" | "pass" | "binary" | "ascii" | "list" | "get" | "put" | "disconnect"
    );
    if needs_connection && !client.is_connected() {
      println!("Not connected to any server.");
      continue;
    }

    match action.as_str() {
      "connect" => match args.as_slice() {
        [host] => connect_and_report(&mut client, host, DEFAULT_PORT).await,
        [host, port] => match port.parse::<u16>() {
          Ok(port) => connect_and_report(&mut client, host, port).await,
          Err(_) => println!("Usage: connect <ip> [port]"),
        },
        _ => println!("Usage: connect <ip> [port]"),
      },
      "user" => match args.as_slice() {
        [name] => report(client.login_user(name).await),
        _ => println!("Usage: user <username>"),
      },
      "pass" => match args.as_slice() {
        [password] => report(client.login_pass(password).await),
        _ => println!("Usage: pass <password>"),
      },
      "binary" => report(client.set_type('I').await),
      "ascii" => report(client.set_type('A').await),
      "list" => match client.list().await {
        Ok(listing) => print!("{}", listing),
        Err(e) => print_error(&e),
      },
      "get" => match args.as_slice() {
        [remote, local] => match client.get(remote, Path::new(local)).await {
          Ok(bytes) => println!("Received {} bytes into {}", bytes, local),
          Err(e) => print_error(&e),
        },
        _ => println!("Usage: get <remote> <local>"),
      },
      "put" => match args.as_slice() {
        [local, remote] => match client.put(Path::new(local), remote).await {
          Ok(bytes) => println!("Sent {} bytes as {}", bytes, remote),
          Err(e) => print_error(&e),
        },
        _ => println!("Usage: put <local> <remote>"),
      },
      "disconnect" => {
        match client.disconnect(true).await {
          Ok(Some(reply)) => {
            print_reply(&reply);
            println!("Disconnected from the server.");
          }
          Ok(None) => println!("Disconnected from the server."),
          Err(e) => print_error(&e),
        }
      }
      "quit" | "exit" => {
        if client.is_connected() {
          // best effort goodbye; we are leaving either way
          let _ = client.disconnect(false).await;
        }
        break;
      }
      "help" => println!("{}", HELP_TEXT),
      _ => println!("Unknown command. Type 'help' for available commands."),
    }
  }

  Ok(())
}

async fn connect_and_report(client: &mut FtpClient, host: &str, port: u16) {
  if client.is_connected() {
    println!("Already connected to a server.");
    return;
  }
  match client.connect(host, port).await {
    Ok(greeting) => print_reply(&greeting),
    Err(e) => print_error(&e),
  }
}

fn report(result: Result<Reply>) {
  match result {
    Ok(reply) => print_reply(&reply),
    Err(e) => print_error(&e),
  }
}
