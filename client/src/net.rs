use std::io;

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg},
    recv_components, send_tagged_components,
    specs::{ClientId, Settings},
};
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};

/// The client side of the coordinator's RPC surface.
///
/// Every call sends one request and drains its whole reply, a `Msg::Err` reply surfaces as
/// an `io::Error`.
pub struct FedClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    client_id: ClientId,
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
}

impl<R, W> FedClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(client_id: ClientId, rx: OnoReceiver<R>, tx: OnoSender<W>) -> Self {
        Self { client_id, rx, tx }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Asks for the budget and index of the server's running round.
    pub async fn get_settings(&mut self) -> io::Result<Settings> {
        let client_id = self.client_id;
        self.tx
            .send(&Msg::Control(Command::GetSettings { client_id }))
            .await?;

        let msg: Msg = self.rx.recv().await?;
        match msg {
            Msg::Control(Command::Settings(settings)) => {
                debug!(
                    round = settings.current_round,
                    components_per_client = settings.components_per_client;
                    "received the settings"
                );
                Ok(settings)
            }
            other => Err(other.unexpected("the settings")),
        }
    }

    /// Downloads the encoded components of the current global ensemble.
    pub async fn download_model(&mut self) -> io::Result<Vec<Vec<u8>>> {
        let client_id = self.client_id;
        self.tx
            .send(&Msg::Control(Command::DownloadModel { client_id }))
            .await?;

        recv_components(&mut self.rx, None).await
    }

    /// Uploads this client's components and waits for the aggregated ensemble.
    ///
    /// # Arguments
    /// * `components` - The encoded components to contribute.
    ///
    /// # Returns
    /// The encoded components of the aggregated ensemble, released once the round's
    /// aggregation finished.
    pub async fn upload_components<B: AsRef<[u8]>>(
        &mut self,
        components: &[B],
    ) -> io::Result<Vec<Vec<u8>>> {
        let client_id = self.client_id;
        self.tx
            .send(&Msg::Control(Command::UploadComponents { client_id }))
            .await?;

        send_tagged_components(&mut self.tx, client_id, components).await?;
        recv_components(&mut self.rx, None).await
    }

    /// Tells the server this client finished the round.
    pub async fn end_of_round(&mut self) -> io::Result<bool> {
        let client_id = self.client_id;
        self.tx
            .send(&Msg::Control(Command::EndOfRound { client_id }))
            .await?;

        let msg: Msg = self.rx.recv().await?;
        match msg {
            Msg::Control(Command::Ack { ok }) => Ok(ok),
            other => Err(other.unexpected("an acknowledgement")),
        }
    }

    /// Closes the session.
    pub async fn disconnect(&mut self) -> io::Result<()> {
        self.tx.send(&Msg::Control(Command::Disconnect)).await
    }
}
