use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> oxftp::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .init();

  oxftp::client::run_repl().await
}
