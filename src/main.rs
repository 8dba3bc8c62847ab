use tracing_subscriber::EnvFilter;

use oxftp::arg_parser::Args;
use oxftp::Server;

#[tokio::main]
async fn main() -> oxftp::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse_args();
  let server = Server::new(args).await?;
  server.serve().await
}
