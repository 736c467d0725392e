//! Component streams: one message per component closed by a `StreamEnd` carrying the count.

use std::io;

use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
    specs::ClientId,
};

/// Streams every component as an untagged message, the shape of a download.
pub async fn send_components<W, B>(tx: &mut OnoSender<W>, components: &[B]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    B: AsRef<[u8]>,
{
    for component in components {
        let msg = Msg::Data(Payload::Component(component.as_ref()));
        tx.send(&msg).await?;
    }

    let end = Msg::Control(Command::StreamEnd {
        components: components.len(),
    });
    tx.send(&end).await
}

/// Streams every component tagged with `client_id`, the shape of an upload.
pub async fn send_tagged_components<W, B>(
    tx: &mut OnoSender<W>,
    client_id: ClientId,
    components: &[B],
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    B: AsRef<[u8]>,
{
    for component in components {
        let msg = Msg::Data(Payload::Tagged {
            client_id,
            component: component.as_ref(),
        });
        tx.send(&msg).await?;
    }

    let end = Msg::Control(Command::StreamEnd {
        components: components.len(),
    });
    tx.send(&end).await
}

/// Drains a component stream until its `StreamEnd`.
///
/// # Arguments
/// * `rx` - The receiving end.
/// * `tag` - When set, every component must be tagged with this client id,
///           otherwise every component must be untagged.
///
/// # Returns
/// The raw components in arrival order. Fails if the announced count doesn't match,
/// a message is out of place or the peer replied with an `Err` message.
pub async fn recv_components<R>(
    rx: &mut OnoReceiver<R>,
    tag: Option<ClientId>,
) -> io::Result<Vec<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut components = Vec::new();

    loop {
        let msg: Msg = rx.recv().await?;

        match (msg, tag) {
            (Msg::Data(Payload::Component(component)), None) => {
                components.push(component.to_vec());
            }
            (
                Msg::Data(Payload::Tagged {
                    client_id,
                    component,
                }),
                Some(expected),
            ) => {
                if client_id != expected {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("component tagged {client_id} inside the stream of {expected}"),
                    ));
                }

                components.push(component.to_vec());
            }
            (Msg::Control(Command::StreamEnd { components: n }), _) => {
                if n != components.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "stream announced {n} components but carried {}",
                            components.len()
                        ),
                    ));
                }

                debug!(components = n; "component stream drained");
                return Ok(components);
            }
            (msg, _) => return Err(msg.unexpected("a component or the end of the stream")),
        }
    }
}
