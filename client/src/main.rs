use std::io;

use client::{ClientConfig, Driver, config};
use log::{info, warn};
use tokio::{net::TcpStream, signal};

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config = ClientConfig::from_env()?;
    let client_id = config::client_id_from_env()?;

    let addr = config.addr();
    let stream = TcpStream::connect(&addr).await?;
    stream.set_nodelay(true)?;
    info!(client_id = client_id; "connected to {addr}");

    let (rx, tx) = stream.into_split();
    let (rx, tx) = comms::channel(rx, tx);
    let driver = Driver::from_config(&config, client_id, rx, tx)?;

    tokio::select! {
        res = driver.run() => {
            let history = res?;
            info!(client_id = client_id, rounds = history.len(); "wrapping up");
        }
        _ = signal::ctrl_c() => {
            warn!(client_id = client_id; "interrupted");
        }
    }

    Ok(())
}
