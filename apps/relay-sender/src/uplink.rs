use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::{net::TcpStream, task::JoinHandle, time::timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::frame::coding::CloseCode, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info};
use url::Url;

use crate::error::SenderError;

/// How long `connect` listens for an immediate refusal after the handshake.
pub const DEFAULT_ADMISSION_WINDOW: Duration = Duration::from_millis(250);

/// Transport carrying frames to the hub. Reconnecting means calling
/// `connect` again, which goes through admission from scratch.
#[async_trait]
pub trait Uplink: Send {
    async fn connect(&mut self) -> Result<(), SenderError>;
    async fn send(&mut self, payload: &str) -> Result<(), SenderError>;
    async fn close(&mut self);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How the hub side of a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Departure {
    code: Option<CloseCode>,
    reason: String,
}

impl Departure {
    fn into_error(self) -> SenderError {
        match self.code {
            Some(CloseCode::Policy) => SenderError::Rejected(self.reason),
            Some(code) => SenderError::Closed(format!("{} {}", u16::from(code), self.reason)),
            None => SenderError::Closed(self.reason),
        }
    }
}

struct Connection {
    sink: SplitSink<WsStream, Message>,
    /// Resolves once the hub goes away.
    reader: JoinHandle<Departure>,
}

pub struct WebSocketUplink {
    url: Url,
    connect_timeout: Duration,
    admission_window: Duration,
    connection: Option<Connection>,
}

impl WebSocketUplink {
    /// `url` must already carry the admission query.
    pub fn new(url: Url, connect_timeout: Duration) -> Self {
        Self {
            url,
            connect_timeout,
            admission_window: DEFAULT_ADMISSION_WINDOW,
            connection: None,
        }
    }

    pub fn with_admission_window(mut self, window: Duration) -> Self {
        self.admission_window = window;
        self
    }
}

async fn departure(reader: JoinHandle<Departure>) -> Departure {
    reader.await.unwrap_or_else(|err| Departure {
        code: None,
        reason: err.to_string(),
    })
}

#[async_trait]
impl Uplink for WebSocketUplink {
    async fn connect(&mut self) -> Result<(), SenderError> {
        self.close().await;
        let (stream, _) = match timeout(self.connect_timeout, connect_async(self.url.as_str())).await {
            Ok(result) => result?,
            Err(_) => return Err(SenderError::ConnectTimeout(self.connect_timeout)),
        };
        let (sink, mut read) = stream.split();
        // Reading keeps ping replies flowing and notices refusals.
        let mut reader = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Close(frame)) => {
                        return match frame {
                            Some(frame) => Departure {
                                code: Some(frame.code),
                                reason: frame.reason.as_str().to_string(),
                            },
                            None => Departure {
                                code: None,
                                reason: "closed without a frame".to_string(),
                            },
                        };
                    }
                    Ok(other) => debug!(?other, "ignoring hub message"),
                    Err(err) => {
                        return Departure {
                            code: None,
                            reason: err.to_string(),
                        }
                    }
                }
            }
            Departure {
                code: None,
                reason: "stream ended".to_string(),
            }
        });

        // The hub validates right after the upgrade; a refusal arrives first.
        if let Ok(joined) = timeout(self.admission_window, &mut reader).await {
            let departed = joined.unwrap_or_else(|err| Departure {
                code: None,
                reason: err.to_string(),
            });
            return Err(departed.into_error());
        }

        info!(host = self.url.host_str().unwrap_or_default(), "uplink connected");
        self.connection = Some(Connection { sink, reader });
        Ok(())
    }

    async fn send(&mut self, payload: &str) -> Result<(), SenderError> {
        let connection = self.connection.as_mut().ok_or(SenderError::NotConnected)?;
        if connection.reader.is_finished() {
            return match self.connection.take() {
                Some(connection) => Err(departure(connection.reader).await.into_error()),
                None => Err(SenderError::NotConnected),
            };
        }
        let sent = connection
            .sink
            .send(Message::Text(payload.to_string().into()))
            .await;
        if let Err(err) = sent {
            self.close().await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            let _ = connection.sink.close().await;
            connection.reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn policy_close_is_a_refusal() {
        let departed = Departure {
            code: Some(CloseCode::Policy),
            reason: "invalid token".into(),
        };
        match departed.into_error() {
            SenderError::Rejected(reason) => assert_eq!(reason, "invalid token"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn other_closes_are_retryable() {
        let away = Departure {
            code: Some(CloseCode::Away),
            reason: "heartbeat timeout".into(),
        };
        let err = away.into_error();
        assert!(matches!(&err, SenderError::Closed(reason) if reason == "1001 heartbeat timeout"));
        assert!(!err.is_terminal());

        let dropped = Departure {
            code: None,
            reason: "stream ended".into(),
        };
        assert!(!dropped.into_error().is_terminal());
    }
}
