//! End-to-end tests: a real server on an ephemeral port, driven with raw
//! control-channel conversations.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use oxftp::arg_parser::Args;
use oxftp::Server;

fn scratch(name: &str) -> PathBuf {
  let dir = std::env::temp_dir().join("oxftp_e2e").join(name);
  let _ = std::fs::remove_dir_all(&dir);
  std::fs::create_dir_all(&dir).unwrap();
  dir
}

async fn start_server(root: &Path) -> SocketAddr {
  let args = Args {
    folder: root.to_string_lossy().to_string(),
    host: "127.0.0.1".to_string(),
    port: 0,
    workers: 16,
    user: "user".to_string(),
    pass: "pass".to_string(),
  };
  let server = Server::new(args).await.unwrap();
  let addr = server.local_addr().unwrap();
  tokio::spawn(server.serve());
  addr
}

struct Control {
  reader: BufReader<OwnedReadHalf>,
  writer: OwnedWriteHalf,
}

impl Control {
  /// Connect and consume the 220 greeting.
  async fn connect(addr: SocketAddr) -> Self {
    let mut control = Self::connect_raw(addr).await;
    let greeting = control.reply().await;
    assert!(greeting.starts_with("220 "), "greeting was {greeting:?}");
    control
  }

  async fn connect_raw(addr: SocketAddr) -> Self {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (rd, wr) = stream.into_split();
    Self {
      reader: BufReader::new(rd),
      writer: wr,
    }
  }

  async fn send(&mut self, line: &str) {
    self.writer.write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
  }

  /// Read one reply line, asserting the universal framing invariant: three
  /// ASCII digits, a space, one CRLF terminator.
  async fn reply(&mut self) -> String {
    let mut raw = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), self.reader.read_until(b'\n', &mut raw))
      .await
      .expect("timed out waiting for reply")
      .unwrap();
    assert!(n > 0, "connection closed while a reply was expected");
    let line = String::from_utf8(raw).unwrap();
    assert!(line.ends_with("\r\n"), "reply not CRLF terminated: {line:?}");
    assert!(!line[..line.len() - 2].contains('\r'), "stray CR in reply: {line:?}");
    let bytes = line.as_bytes();
    assert!(bytes[..3].iter().all(u8::is_ascii_digit), "no reply code: {line:?}");
    assert_eq!(bytes[3], b' ', "no separator after code: {line:?}");
    line.trim_end().to_string()
  }

  async fn cmd(&mut self, line: &str) -> String {
    self.send(line).await;
    self.reply().await
  }

  async fn login(&mut self) {
    assert!(self.cmd("USER user").await.starts_with("331 "));
    assert!(self.cmd("PASS pass").await.starts_with("230 "));
  }

  /// Negotiate PASV and dial the advertised endpoint (RFC byte order).
  async fn open_passive(&mut self) -> TcpStream {
    let reply = self.cmd("PASV").await;
    assert!(reply.starts_with("227 "), "PASV failed: {reply:?}");
    let endpoint = pasv_endpoint(&reply);
    tokio::time::timeout(Duration::from_secs(1), TcpStream::connect(endpoint))
      .await
      .expect("data dial timed out")
      .unwrap()
  }

  /// Expect the server to half-close: the next read returns EOF.
  async fn expect_eof(&mut self) {
    let mut buf = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(5), self.reader.read_until(b'\n', &mut buf))
      .await
      .expect("timed out waiting for EOF")
      .unwrap();
    assert_eq!(n, 0, "expected EOF, read {buf:?}");
  }
}

fn pasv_endpoint(reply: &str) -> SocketAddr {
  let start = reply.find('(').unwrap() + 1;
  let end = reply.find(')').unwrap();
  let fields: Vec<u16> = reply[start..end]
    .split(',')
    .map(|f| f.trim().parse().unwrap())
    .collect();
  assert_eq!(fields.len(), 6, "bad PASV tuple in {reply:?}");
  let ip = format!("{}.{}.{}.{}", fields[0], fields[1], fields[2], fields[3]);
  let port = fields[4] * 256 + fields[5];
  format!("{ip}:{port}").parse().unwrap()
}

#[tokio::test]
async fn happy_path_upload() {
  let root = scratch("happy_path_upload");
  let addr = start_server(&root).await;
  let mut control = Control::connect(addr).await;

  assert!(control.cmd("USER user").await.starts_with("331 "));
  assert!(control.cmd("PASS pass").await.starts_with("230 "));
  assert!(control.cmd("TYPE I").await.starts_with("200 "));

  let mut data = control.open_passive().await;
  assert!(control.cmd("STOR hello.bin").await.starts_with("150 "));
  let payload = [0x00u8, 0xFF, 0x0A, 0x0D];
  data.write_all(&payload).await.unwrap();
  data.shutdown().await.unwrap();
  drop(data);
  assert!(control.reply().await.starts_with("226 "));

  assert_eq!(std::fs::read(root.join("hello.bin")).unwrap(), payload);
}

#[tokio::test]
async fn unauthenticated_list_is_rejected() {
  let root = scratch("unauthenticated_list");
  let addr = start_server(&root).await;
  let mut control = Control::connect(addr).await;

  assert_eq!(
    control.cmd("LIST").await,
    "530 Please login with user and pass."
  );
}

#[tokio::test]
async fn state_gate_covers_all_protected_verbs() {
  let root = scratch("state_gate");
  let addr = start_server(&root).await;
  let mut control = Control::connect(addr).await;

  for verb in [
    "PASV",
    "PORT 127,0,0,1,200,10",
    "LIST",
    "NLST",
    "RETR x",
    "STOR x",
    "TYPE I",
  ] {
    let reply = control.cmd(verb).await;
    assert!(reply.starts_with("530 "), "{verb} got {reply:?}");
  }

  // the exempt verbs still work before login
  assert!(control.cmd("NOOP").await.starts_with("200 "));
  assert!(control.cmd("OPTS UTF8 ON").await.starts_with("200 "));
}

#[tokio::test]
async fn anti_bounce_port_is_rejected() {
  let root = scratch("anti_bounce");
  let addr = start_server(&root).await;
  let mut control = Control::connect(addr).await;
  control.login().await;

  // control peer is 127.0.0.1; the advertised address is not
  let reply = control.cmd("PORT 10,0,0,6,10,11").await;
  assert!(reply.starts_with("501 "), "got {reply:?}");

  // nothing was prepared: a transfer command finds no data channel
  assert!(control.cmd("LIST").await.starts_with("425 "));
}

#[tokio::test]
async fn pasv_advertises_a_dialable_endpoint() {
  let root = scratch("pasv_advertisement");
  let addr = start_server(&root).await;
  let mut control = Control::connect(addr).await;
  control.login().await;

  let reply = control.cmd("PASV").await;
  assert!(reply.starts_with("227 "), "got {reply:?}");
  let endpoint = pasv_endpoint(&reply);
  assert_eq!(endpoint.ip(), addr.ip(), "advertised IP is the control socket's");
  assert!((60001..=65000).contains(&endpoint.port()), "port {} out of range", endpoint.port());

  let dialed = tokio::time::timeout(Duration::from_secs(1), TcpStream::connect(endpoint)).await;
  assert!(dialed.expect("dial timed out").is_ok());
}

#[tokio::test]
async fn pasv_supersedes_prior_negotiation() {
  let root = scratch("pasv_supersede");
  let addr = start_server(&root).await;
  let mut control = Control::connect(addr).await;
  control.login().await;

  let first = pasv_endpoint(&control.cmd("PASV").await);
  let second = pasv_endpoint(&control.cmd("PASV").await);

  // the first listener is gone; only the second accepts
  tokio::time::sleep(Duration::from_millis(50)).await;
  if first != second {
    assert!(TcpStream::connect(first).await.is_err(), "superseded listener still accepting");
  }
  assert!(TcpStream::connect(second).await.is_ok());
}

#[tokio::test]
async fn quit_closes_cleanly() {
  let root = scratch("quit_clean");
  let addr = start_server(&root).await;
  let mut control = Control::connect(addr).await;
  control.login().await;

  assert!(control.cmd("QUIT").await.starts_with("221 "));
  control.expect_eof().await;
}

#[tokio::test]
async fn directory_traversal_is_rejected() {
  let root = scratch("traversal");
  let addr = start_server(&root).await;
  let mut control = Control::connect(addr).await;
  control.login().await;

  assert!(control.cmd("LIST ../../etc").await.starts_with("501 "));
  assert!(control.cmd("RETR ../secret").await.starts_with("550 "));
  assert!(control.cmd("STOR ../planted").await.starts_with("550 "));
  assert!(!root.parent().unwrap().join("planted").exists());
}

#[tokio::test]
async fn stor_retr_round_trip_preserves_bytes() {
  let root = scratch("round_trip");
  let addr = start_server(&root).await;
  let mut control = Control::connect(addr).await;
  control.login().await;

  let mut payload = b"line one\r\nline two\nnul:\0 done\r".to_vec();
  payload.extend((0u16..=255).map(|b| b as u8));

  let mut data = control.open_passive().await;
  assert!(control.cmd("STOR blob.bin").await.starts_with("150 "));
  data.write_all(&payload).await.unwrap();
  data.shutdown().await.unwrap();
  drop(data);
  assert!(control.reply().await.starts_with("226 "));

  let mut data = control.open_passive().await;
  assert!(control.cmd("RETR blob.bin").await.starts_with("150 "));
  let mut received = Vec::new();
  data.read_to_end(&mut received).await.unwrap();
  drop(data);
  assert!(control.reply().await.starts_with("226 "));

  assert_eq!(received, payload);
}

#[tokio::test]
async fn list_after_stor_names_the_file() {
  let root = scratch("list_after_stor");
  let addr = start_server(&root).await;
  let mut control = Control::connect(addr).await;
  control.login().await;

  let mut data = control.open_passive().await;
  assert!(control.cmd("STOR fresh.txt").await.starts_with("150 "));
  data.write_all(b"contents").await.unwrap();
  data.shutdown().await.unwrap();
  drop(data);
  assert!(control.reply().await.starts_with("226 "));

  let mut data = control.open_passive().await;
  assert!(control.cmd("LIST").await.starts_with("150 "));
  let mut listing = String::new();
  data.read_to_string(&mut listing).await.unwrap();
  drop(data);
  assert!(control.reply().await.starts_with("226 "));

  let line = listing
    .split("\r\n")
    .find(|l| l.ends_with("fresh.txt"))
    .expect("LIST does not name the stored file");
  assert!(line.starts_with("-rw-r--r-- 1 owner group 8 "));
}

#[tokio::test]
async fn nlst_is_handled_like_list() {
  let root = scratch("nlst");
  std::fs::write(root.join("a.txt"), b"a").unwrap();
  let addr = start_server(&root).await;
  let mut control = Control::connect(addr).await;
  control.login().await;

  let mut data = control.open_passive().await;
  assert!(control.cmd("NLST").await.starts_with("150 "));
  let mut listing = String::new();
  data.read_to_string(&mut listing).await.unwrap();
  drop(data);
  assert!(control.reply().await.starts_with("226 "));
  assert!(listing.contains("a.txt"));
}

#[tokio::test]
async fn retr_missing_file_is_550() {
  let root = scratch("retr_missing");
  let addr = start_server(&root).await;
  let mut control = Control::connect(addr).await;
  control.login().await;

  control.cmd("PASV").await;
  assert!(control.cmd("RETR nope.bin").await.starts_with("550 "));
  // the failed transfer consumed the negotiation
  assert!(control.cmd("RETR nope.bin").await.starts_with("425 "));
}

#[tokio::test]
async fn bad_credentials_are_530() {
  let root = scratch("bad_creds");
  let addr = start_server(&root).await;
  let mut control = Control::connect(addr).await;

  assert!(control.cmd("USER user").await.starts_with("331 "));
  assert!(control.cmd("PASS wrong").await.starts_with("530 "));
  // still locked out
  assert!(control.cmd("LIST").await.starts_with("530 "));

  // PASS with no preceding USER on a fresh session
  let mut control = Control::connect(addr).await;
  assert!(control.cmd("PASS pass").await.starts_with("530 "));
}

#[tokio::test]
async fn argument_validation_replies_501() {
  let root = scratch("argument_validation");
  let addr = start_server(&root).await;
  let mut control = Control::connect(addr).await;

  assert!(control.cmd("USER").await.starts_with("501 "));
  let long_name = "x".repeat(26);
  assert!(control.cmd(&format!("USER {long_name}")).await.starts_with("501 "));
  assert!(control.cmd("OPTS UTF8 OFF").await.starts_with("501 "));

  control.login().await;
  assert!(control.cmd("TYPE Z").await.starts_with("501 "));
  assert!(control.cmd("TYPE").await.starts_with("501 "));
  assert!(control.cmd("PORT").await.starts_with("501 "));
  assert!(control.cmd("PORT 1,2,3").await.starts_with("501 "));
  assert!(control.cmd("RETR").await.starts_with("501 "));
  assert!(control.cmd("STOR").await.starts_with("501 "));
}

#[tokio::test]
async fn unknown_command_replies_502() {
  let root = scratch("unknown_command");
  let addr = start_server(&root).await;
  let mut control = Control::connect(addr).await;

  assert_eq!(control.cmd("MKD stuff").await, "502 Command not implemented.");
  // the session survives
  assert!(control.cmd("NOOP").await.starts_with("200 "));
}

#[tokio::test]
async fn port_mode_transfer_works() {
  let root = scratch("port_mode");
  std::fs::write(root.join("served.bin"), b"active mode payload").unwrap();
  let addr = start_server(&root).await;
  let mut control = Control::connect(addr).await;
  control.login().await;

  // client-side listener the server will dial
  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let port = listener.local_addr().unwrap().port();
  let arg = format!("127,0,0,1,{},{}", port >> 8, port & 0xFF);
  assert!(control.cmd(&format!("PORT {arg}")).await.starts_with("200 "));

  assert!(control.cmd("RETR served.bin").await.starts_with("150 "));
  let (mut data, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
    .await
    .expect("server never dialed back")
    .unwrap();
  let mut received = Vec::new();
  data.read_to_end(&mut received).await.unwrap();
  drop(data);
  assert!(control.reply().await.starts_with("226 "));
  assert_eq!(received, b"active mode payload");
}

#[tokio::test]
async fn saturated_pool_queues_new_clients() {
  let root = scratch("saturated_pool");
  let args = Args {
    folder: root.to_string_lossy().to_string(),
    host: "127.0.0.1".to_string(),
    port: 0,
    workers: 1,
    user: "user".to_string(),
    pass: "pass".to_string(),
  };
  let server = Server::new(args).await.unwrap();
  let addr = server.local_addr().unwrap();
  tokio::spawn(server.serve());

  let mut first = Control::connect(addr).await;

  // second client connects at the TCP level but is not greeted while the
  // single worker is busy
  let mut second = Control::connect_raw(addr).await;
  let mut buf = Vec::new();
  let greeted_early = tokio::time::timeout(
    Duration::from_millis(200),
    second.reader.read_until(b'\n', &mut buf),
  )
  .await;
  assert!(greeted_early.is_err(), "pool admitted a second session");

  assert!(first.cmd("QUIT").await.starts_with("221 "));
  let greeting = second.reply().await;
  assert!(greeting.starts_with("220 "));
}

#[tokio::test]
async fn non_crlf_line_is_discarded() {
  let root = scratch("non_crlf");
  let addr = start_server(&root).await;
  let mut control = Control::connect(addr).await;

  // bare-LF line is dropped without a reply; the next proper command works
  control.writer.write_all(b"NOOP\n").await.unwrap();
  assert!(control.cmd("NOOP").await.starts_with("200 "));
}
