use std::{io, sync::Arc};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg},
    recv_components, send_components,
};
use forest::Component;
use log::{debug, error, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::coordinator::Coordinator;

/// Serves a single client connection until it disconnects.
///
/// Every request is answered in order; coordinator failures become `Err` replies while
/// protocol violations end the session. Once the last round finished any command but
/// `Disconnect` gets an `Err` reply and ends the session.
///
/// # Arguments
/// * `coordinator` - The shared round coordinator.
/// * `rx` - The receiving end of the connection.
/// * `tx` - The sending end of the connection.
pub async fn session<C, R, W>(
    coordinator: Arc<Coordinator<C>>,
    mut rx: OnoReceiver<R>,
    mut tx: OnoSender<W>,
) -> io::Result<()>
where
    C: Component,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let shutdown = coordinator.shutdown();

    loop {
        let msg: Msg = match rx.recv().await {
            Ok(msg) => msg,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("peer closed the connection");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let Msg::Control(command) = msg else {
            let err = msg.unexpected("a command");
            tx.send(&Msg::Err(err.to_string().into())).await?;
            return Err(err);
        };

        if shutdown.is_cancelled() && command != Command::Disconnect {
            debug!(command:? = command; "refusing a command after the last round");
            tx.send(&Msg::Err("the federation already finished".into())).await?;
            return Ok(());
        }

        match command {
            Command::GetSettings { client_id } => {
                let settings = coordinator.get_settings(client_id);
                tx.send(&Msg::Control(Command::Settings(settings))).await?;
            }
            Command::DownloadModel { client_id } => {
                let snapshot = coordinator.download_model(client_id);
                send_components(&mut tx, snapshot.encoded()).await?;
            }
            Command::UploadComponents { client_id } => {
                let encoded = recv_components(&mut rx, Some(client_id)).await?;

                match coordinator.upload_components(client_id, encoded).await {
                    Ok(snapshot) => send_components(&mut tx, snapshot.encoded()).await?,
                    Err(e) => {
                        warn!(client_id = client_id; "upload rejected: {e}");
                        tx.send(&Msg::Err(e.to_string().into())).await?;
                    }
                }
            }
            Command::EndOfRound { client_id } => {
                let ok = match coordinator.end_of_round(client_id).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!(client_id = client_id; "cannot close the round: {e}");
                        false
                    }
                };

                tx.send(&Msg::Control(Command::Ack { ok })).await?;
            }
            Command::Disconnect => {
                debug!("client disconnected");
                return Ok(());
            }
            command => {
                let err = io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("a client can't send {command:?}"),
                );
                tx.send(&Msg::Err(err.to_string().into())).await?;
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use comms::specs::Settings;
    use tokio::io as tokio_io;

    use super::*;
    use crate::{
        aggregation::{Aggregator, Strategy},
        config::{AggregationFailurePolicy, BarrierPolicy, Schedule},
        coordinator::RoundSettings,
        pool::WorkerPool,
        testing::{Fixed, validation},
    };

    fn coordinator() -> Arc<Coordinator<Fixed>> {
        let settings = RoundSettings {
            expected_clients: 1,
            rounds: 2,
            schedule: Schedule {
                initial: 2,
                increment: 1,
            },
            barrier: BarrierPolicy::Indefinite,
            on_failure: AggregationFailurePolicy::RetainStale,
        };

        let coordinator = Coordinator::new(
            settings,
            Arc::new(Aggregator::new(Strategy::Random { ratio: 1.0 }, Some(1))),
            Arc::new(|_: usize, n: usize| {
                Ok((0..n as u32).map(|i| Fixed::new(i, vec![0.0])).collect())
            }),
            validation(&[0.0]),
            WorkerPool::new(1).unwrap(),
        )
        .unwrap();

        Arc::new(coordinator)
    }

    #[tokio::test]
    async fn commands_after_the_last_round_are_refused() -> io::Result<()> {
        let coordinator = coordinator();

        let (sv_stream, cl_stream) = tokio_io::duplex(1 << 12);
        let (sv_rx, sv_tx) = tokio_io::split(sv_stream);
        let (sv_rx, sv_tx) = comms::channel(sv_rx, sv_tx);
        let (cl_rx, cl_tx) = tokio_io::split(cl_stream);
        let (mut cl_rx, mut cl_tx) = comms::channel(cl_rx, cl_tx);

        let served = tokio::spawn(session(Arc::clone(&coordinator), sv_rx, sv_tx));

        cl_tx
            .send(&Msg::Control(Command::GetSettings { client_id: 1 }))
            .await?;
        let reply: Msg = cl_rx.recv().await?;
        assert_eq!(
            reply,
            Msg::Control(Command::Settings(Settings {
                components_per_client: 2,
                current_round: 0,
            }))
        );

        coordinator.shutdown().cancel();

        cl_tx
            .send(&Msg::Control(Command::GetSettings { client_id: 1 }))
            .await?;
        let reply: Msg = cl_rx.recv().await?;
        assert!(matches!(reply, Msg::Err(_)));

        served.await.unwrap()?;
        Ok(())
    }

    #[tokio::test]
    async fn disconnect_is_accepted_after_the_last_round() -> io::Result<()> {
        let coordinator = coordinator();
        coordinator.shutdown().cancel();

        let (sv_stream, cl_stream) = tokio_io::duplex(1 << 12);
        let (sv_rx, sv_tx) = tokio_io::split(sv_stream);
        let (sv_rx, sv_tx) = comms::channel(sv_rx, sv_tx);
        let (cl_rx, cl_tx) = tokio_io::split(cl_stream);
        let (_cl_rx, mut cl_tx) = comms::channel(cl_rx, cl_tx);

        let served = tokio::spawn(session(coordinator, sv_rx, sv_tx));

        cl_tx.send(&Msg::Control(Command::Disconnect)).await?;
        served.await.unwrap()?;
        Ok(())
    }
}
