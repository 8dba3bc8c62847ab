//! Minimal FTP (RFC 959) server and interactive client.
//!
//! The server speaks the classic dual-channel protocol: a persistent
//! CRLF-framed control connection per client plus one short-lived data
//! connection per transfer, negotiated with PASV (we listen) or PORT (we
//! dial). One hard credential, one rooted directory subtree, many concurrent
//! sessions.

pub mod arg_parser;
pub mod channel;
pub mod client;
pub mod commands;
pub mod error;
pub mod fsview;
pub mod handlers;
pub mod reply;
pub mod server;
pub mod session;

pub use error::{FtpError, Result};
pub use server::Server;
