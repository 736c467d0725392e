use std::io;

use log::{info, warn};
use server::{ServerBuilder, ServerConfig};
use tokio::{net::TcpListener, signal};

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config = ServerConfig::from_env()?;
    info!(
        clients = config.clients,
        rounds = config.rounds,
        strategy = config.aggregation_strategy.as_str();
        "starting the server"
    );

    let mut server = ServerBuilder::new(&config).build()?;
    let listener = TcpListener::bind(config.addr()).await?;

    tokio::select! {
        res = server.serve(listener) => res?,
        _ = signal::ctrl_c() => {
            warn!("interrupted, draining the open sessions");
            server.finish().await;
        }
    }

    Ok(())
}
