use std::{borrow::Cow, io};

use crate::{
    Deserialize, Serialize,
    specs::{ClientId, Settings},
};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();
const CLIENT_ID_SIZE: usize = size_of::<ClientId>();

const ERR: Header = 0;
const CONTROL: Header = 1;
const COMPONENT: Header = 2;
const TAGGED: Header = 3;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug, PartialEq, Eq)]
pub enum Payload<'a> {
    /// A single encoded component of a download stream.
    Component(&'a [u8]),
    /// A single encoded component of an upload stream, tagged with its sender.
    Tagged {
        client_id: ClientId,
        component: &'a [u8],
    },
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    GetSettings { client_id: ClientId },
    Settings(Settings),
    DownloadModel { client_id: ClientId },
    UploadComponents { client_id: ClientId },
    StreamEnd { components: usize },
    EndOfRound { client_id: ClientId },
    Ack { ok: bool },
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug, PartialEq, Eq)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    fn buf_is_too_small<T>(size: usize, needed: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {needed} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }

    /// Builds the error returned when this message is not the one a peer was waiting for.
    ///
    /// An `Err` message carries the peer's own reason, so it is surfaced as is.
    pub fn unexpected(&self, expected: &str) -> io::Error {
        match self {
            Msg::Err(reason) => io::Error::other(reason.to_string()),
            other => io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected {expected}, got {other:?}"),
            ),
        }
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL.to_be_bytes());

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, cmd).unwrap();
                None
            }
            Msg::Data(Payload::Component(component)) => {
                buf.extend_from_slice(&COMPONENT.to_be_bytes());
                Some(component)
            }
            Msg::Data(Payload::Tagged {
                client_id,
                component,
            }) => {
                buf.extend_from_slice(&TAGGED.to_be_bytes());
                buf.extend_from_slice(&client_id.to_be_bytes());
                Some(component)
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len(), HEADER_SIZE);
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);

        // SAFETY: We splitted the buffer to be of size `HEADER_SIZE` just above.
        let kind = Header::from_be_bytes(kind_buf.try_into().unwrap());

        match kind {
            ERR => {
                let string = str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            COMPONENT => Ok(Self::Data(Payload::Component(rest))),
            TAGGED => {
                if rest.len() < CLIENT_ID_SIZE {
                    return Self::buf_is_too_small(buf.len(), HEADER_SIZE + CLIENT_ID_SIZE);
                }

                let (id_buf, component) = rest.split_at(CLIENT_ID_SIZE);

                // SAFETY: Same as above, `id_buf` is exactly `CLIENT_ID_SIZE` long.
                let client_id = ClientId::from_be_bytes(id_buf.try_into().unwrap());

                Ok(Self::Data(Payload::Tagged {
                    client_id,
                    component,
                }))
            }
            kind => Self::invalid_kind(kind),
        }
    }
}
