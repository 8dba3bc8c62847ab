//! Data-channel broker.
//!
//! A transfer command consumes the prepared channel by value, so a PASV
//! listener can never outlive the transfer that was supposed to use it.

use rand::Rng;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::error::{FtpError, Result};

/// Passive ports are advertised from this range.
pub const PASV_PORT_BASE: u16 = 60001;
pub const PASV_PORT_SPAN: u16 = 5000;

const PASV_BIND_ATTEMPTS: u32 = 10;
const PASV_ACCEPT_DEADLINE: Duration = Duration::from_secs(30);

/// A prepared but not yet opened data channel.
#[derive(Debug)]
pub enum PendingData {
  /// PASV: we listen, the client dials the advertised port.
  Passive {
    listener: TcpListener,
    port: u16,
  },
  /// PORT: the client listens, we dial its advertised endpoint.
  Active {
    peer: SocketAddrV4,
  },
}

/// Bind a listener on a random port from the passive range, rebinding on
/// collision a bounded number of times.
pub async fn bind_passive() -> Result<(TcpListener, u16)> {
  for _ in 0..PASV_BIND_ATTEMPTS {
    let port = PASV_PORT_BASE + rand::thread_rng().gen_range(0..PASV_PORT_SPAN);
    match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
      Ok(listener) => {
        debug!(port, "passive listener bound");
        return Ok((listener, port));
      }
      Err(_) => continue,
    }
  }
  Err(FtpError::PassiveExhausted)
}

impl PendingData {
  /// Open the data socket: accept on the passive listener (bounded wait) or
  /// dial the active peer. Consumes the record either way; the passive
  /// listener is dropped as soon as the peer socket exists.
  pub async fn open(self) -> Result<TcpStream> {
    match self {
      PendingData::Passive { listener, .. } => {
        let (stream, peer) = tokio::time::timeout(PASV_ACCEPT_DEADLINE, listener.accept())
          .await
          .map_err(|_| FtpError::Timeout)??;
        debug!(%peer, "data connection accepted");
        Ok(stream)
      }
      PendingData::Active { peer } => {
        let stream = TcpStream::connect(peer).await?;
        debug!(%peer, "data connection dialed");
        Ok(stream)
      }
    }
  }
}
