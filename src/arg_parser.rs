use clap::Parser;

/// Minimal FTP server in Rust
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// Folder path to serve
  #[arg(long, default_value_t = String::from("./"))]
  pub folder: String,

  /// Listening host
  #[arg(long, default_value_t = String::from("127.0.0.1"))]
  pub host: String,

  /// Listening port
  #[arg(long, default_value_t = 21)]
  pub port: u16,

  /// Concurrent session limit
  #[arg(long, default_value_t = 16)]
  pub workers: usize,

  /// Accepted user name
  #[arg(long, default_value_t = String::from("user"))]
  pub user: String,

  /// Accepted password
  #[arg(long, default_value_t = String::from("pass"))]
  pub pass: String,
}

impl Args {
  pub fn parse_args() -> Args {
    self::Parser::parse()
  }
}
