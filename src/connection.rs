//! One request, one response, one JSON object per line.

use crate::{log, message::Message, stats::SharedStats, Error, Result};
use futures::{SinkExt, StreamExt};
use std::{net::SocketAddr, time::Duration};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LinesCodec};

/// Pause between two attempts of an exchange that failed validation.
pub const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Longest line accepted from the other side.
pub const MAX_LINE_LENGTH: usize = 16 * 1024;

pub struct Connection {
    lines: Framed<TcpStream, LinesCodec>,
    peer: SocketAddr,
    meter: Option<SharedStats>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        Ok(Self {
            lines: Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
            peer,
            meter: None,
        })
    }

    /// A connection that counts every line it sends and receives into `stats`.
    pub fn metered(stream: TcpStream, stats: SharedStats) -> Result<Self> {
        let mut connection = Self::new(stream)?;
        connection.meter = Some(stats);
        Ok(connection)
    }

    pub async fn connect(address: impl ToSocketAddrs) -> Result<Self> {
        Self::new(TcpStream::connect(address).await?)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn send<M: Message>(&mut self, message: &M) -> Result<()> {
        let line = message.to_json_string()?;
        self.lines.send(line).await?;
        if let Some(stats) = &self.meter {
            stats.lock().await.record_sent();
        }
        Ok(())
    }

    /// Reads the next message. Fails with [`Error::Closed`] once the other side hung up.
    pub async fn recv<M: Message>(&mut self) -> Result<M> {
        let line = match self.lines.next().await {
            Some(line) => line?,
            None => return Err(Error::Closed(self.peer)),
        };
        if let Some(stats) = &self.meter {
            stats.lock().await.record_received();
        }
        M::from_json_string(&line)
    }

    pub async fn request<Q: Message, R: Message>(&mut self, request: &Q) -> Result<R> {
        self.send(request).await?;
        self.recv().await
    }

    /// Repeats `request` until `accept` takes the response, with no cap on attempts.
    ///
    /// Responses that fail to decode or that `accept` turns down are retried
    /// after [`RETRY_DELAY`]; any other error ends the exchange.
    pub async fn request_until<Q, R, T>(
        &mut self,
        request: &Q,
        mut accept: impl FnMut(R) -> Option<T>,
    ) -> Result<T>
    where
        Q: Message,
        R: Message,
    {
        loop {
            match self.request::<Q, R>(request).await {
                Ok(response) => {
                    if let Some(value) = accept(response) {
                        return Ok(value);
                    }
                }
                Err(e) if e.is_retryable() => {
                    log::debug(&format!("Retrying request to {}: {e}", self.peer));
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ControlRequest, ControlResponse};
    use crate::stats::Stats;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn request_until_retries_malformed_and_declined_responses() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let responder = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            let answers = [
                "{\"code\":\"GET_READY_RESPONSE\"}\n",
                "garbage\n",
                "{\"code\":\"GET_READY_RESPONSE\",\"ready\":false}\n",
                "{\"code\":\"GET_READY_RESPONSE\",\"ready\":true}\n",
            ];
            for answer in answers {
                let request = lines.next_line().await.unwrap().unwrap();
                assert_eq!(request, r#"{"code":"GET_READY"}"#);
                write.write_all(answer.as_bytes()).await.unwrap();
            }
        });

        let stats = Stats::shared();
        let stream = TcpStream::connect(address).await.unwrap();
        let mut connection = Connection::metered(stream, stats.clone()).unwrap();
        connection
            .request_until(&ControlRequest::GetReady, |response: ControlResponse| match response {
                ControlResponse::Ready { ready: true } => Some(()),
                _ => None,
            })
            .await
            .unwrap();
        responder.await.unwrap();

        let stats = *stats.lock().await;
        assert_eq!(stats.messages_sent, 4);
        assert_eq!(stats.messages_received, 4);
    }

    #[tokio::test]
    async fn failed_sends_are_not_counted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let closer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let stats = Stats::shared();
        let stream = TcpStream::connect(address).await.unwrap();
        let mut connection = Connection::metered(stream, stats.clone()).unwrap();
        closer.await.unwrap();

        // the first writes may still land in the socket buffer, a later one fails
        let mut delivered = 0;
        let mut failed = false;
        for _ in 0..100 {
            match connection.send(&ControlRequest::GetPort).await {
                Ok(()) => delivered += 1,
                Err(_) => {
                    failed = true;
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(failed);
        assert_eq!(stats.lock().await.messages_sent, delivered);
    }

    #[tokio::test]
    async fn closed_connection_is_not_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let closer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut connection = Connection::connect(address).await.unwrap();
        closer.await.unwrap();
        let result = connection
            .request_until(&ControlRequest::GetPort, |response: ControlResponse| match response {
                ControlResponse::Port { port } => Some(port),
                _ => None,
            })
            .await;
        assert!(matches!(result, Err(e) if !e.is_retryable()));
    }
}
