//! Accept loop and bounded session pool.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::arg_parser::Args;
use crate::error::Result;
use crate::fsview::FsView;
use crate::session::{Credentials, Session};

#[derive(Debug)]
pub struct Server {
  listener: TcpListener,
  fs: FsView,
  creds: Credentials,
  workers: Arc<Semaphore>,
}

impl Server {
  pub async fn new(cfg: Args) -> Result<Self> {
    let listener = TcpListener::bind(format!("{}:{}", cfg.host, cfg.port)).await?;
    let fs = FsView::new(&cfg.folder)?;
    Ok(Self {
      listener,
      fs,
      creds: Credentials {
        user: cfg.user,
        pass: cfg.pass,
      },
      workers: Arc::new(Semaphore::new(cfg.workers)),
    })
  }

  pub fn local_addr(&self) -> Result<SocketAddr> {
    Ok(self.listener.local_addr()?)
  }

  /// Accept clients forever, one session task per connection. A semaphore
  /// permit is taken before `accept`, so a saturated pool queues new clients
  /// without blocking the listener on any slow session.
  pub async fn serve(self) -> Result<()> {
    info!(addr = %self.local_addr()?, root = %self.fs.root().display(), "listening");
    loop {
      let permit = match self.workers.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return Ok(()),
      };
      let (socket, addr) = match self.listener.accept().await {
        Ok(accepted) => accepted,
        Err(e) => {
          warn!(error = %e, "accept failed");
          continue;
        }
      };
      info!(peer = %addr, "client connected");

      let fs = self.fs.clone();
      let creds = self.creds.clone();
      tokio::spawn(async move {
        let _permit = permit;
        match Session::new(socket, fs, creds) {
          Ok(session) => {
            if let Err(e) = session.run().await {
              warn!(peer = %addr, error = %e, "session terminated");
            }
          }
          Err(e) => warn!(peer = %addr, error = %e, "session setup failed"),
        }
        info!(peer = %addr, "client disconnected");
      });
    }
  }
}
