mod builder;
mod session;

use std::{io, sync::Arc, time::Duration};

use comms::{OnoReceiver, OnoSender};
use forest::Component;
use log::{info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    task::{JoinError, JoinSet},
    time,
};

pub use builder::ServerBuilder;

use crate::coordinator::Coordinator;

/// The network face of the coordinator, it owns one task per client connection.
pub struct FedServer<C: Component> {
    coordinator: Arc<Coordinator<C>>,
    tasks: JoinSet<io::Result<()>>,
    grace: Duration,
}

impl<C: Component> FedServer<C> {
    /// Creates a new `FedServer`.
    ///
    /// # Arguments
    /// * `coordinator` - The round coordinator every session talks to.
    /// * `grace` - How long in-flight sessions may keep running once the last round ends.
    pub fn new(coordinator: Arc<Coordinator<C>>, grace: Duration) -> Self {
        Self {
            coordinator,
            tasks: JoinSet::new(),
            grace,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator<C>> {
        &self.coordinator
    }

    /// Binds a new client connection to this server and spawns its session.
    ///
    /// # Arguments
    /// * `rx` - The receiving end of the communication.
    /// * `tx` - The sending end of the communication.
    pub fn spawn<R, W>(&mut self, rx: OnoReceiver<R>, tx: OnoSender<W>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let coordinator = Arc::clone(&self.coordinator);
        self.tasks.spawn(session::session(coordinator, rx, tx));
    }

    /// Accepts clients until the last round finishes, then drains the open sessions.
    pub async fn serve(&mut self, listener: TcpListener) -> io::Result<()> {
        let shutdown = self.coordinator.shutdown();
        info!(addr:? = listener.local_addr()?; "listening for clients");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("cannot accept a connection: {e}");
                            continue;
                        }
                    };

                    info!(addr:? = addr; "client connected");
                    stream.set_nodelay(true)?;

                    let (rx, tx) = stream.into_split();
                    let (rx, tx) = comms::channel(rx, tx);
                    self.spawn(rx, tx);
                }
                Some(res) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    Self::log_session(res);
                }
            }
        }

        self.finish().await;
        Ok(())
    }

    /// Waits for the open sessions during the grace period and aborts whatever is left.
    pub async fn finish(&mut self) {
        let tasks = &mut self.tasks;

        let drain = async {
            while let Some(res) = tasks.join_next().await {
                Self::log_session(res);
            }
        };

        if time::timeout(self.grace, drain).await.is_err() {
            warn!(sessions = self.tasks.len(); "grace period elapsed, aborting the open sessions");
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        info!("server finished");
    }

    fn log_session(res: Result<io::Result<()>, JoinError>) {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("session ended with an error: {e}"),
            Err(e) => warn!("session task failed: {e}"),
        }
    }
}
