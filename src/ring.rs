//! Connections between neighbors: the ring server answering fork status and
//! token requests, and the client side used by the dining engine.

use crate::{
    connection::Connection,
    log,
    message::{DiningState, PeerAddress, RingRequest, RingResponse},
    state::PhilosopherState,
    Error, Result,
};
use color_print::cformat;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, TcpStream};

/// Outbound connection to one neighbor's ring server.
pub struct RingClient {
    address: PeerAddress,
    connection: Connection,
}

impl RingClient {
    pub async fn connect(address: PeerAddress, state: &PhilosopherState) -> Result<Self> {
        let stream = TcpStream::connect(address.as_str()).await?;
        Ok(Self {
            address,
            connection: Connection::metered(stream, state.stats())?,
        })
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    /// Asks whether the neighbor holds our shared fork, identifying ourselves by `own_port`.
    pub async fn fork_status(&mut self, own_port: u16) -> Result<(bool, DiningState)> {
        self.connection
            .request_until(
                &RingRequest::GetForkStatus { port: own_port },
                |response: RingResponse| match response {
                    RingResponse::ForkStatus { with_fork, state } => Some((with_fork, state)),
                    RingResponse::TokenAccepted => None,
                },
            )
            .await
    }

    pub async fn pass_token(&mut self, own_port: u16) -> Result<()> {
        self.connection
            .request_until(
                &RingRequest::PostToken { port: own_port },
                |response: RingResponse| {
                    matches!(response, RingResponse::TokenAccepted).then_some(())
                },
            )
            .await
    }
}

/// Accepts neighbors until the philosopher is told to die.
pub async fn serve(listener: TcpListener, state: Arc<PhilosopherState>) -> Result<()> {
    loop {
        let (stream, address) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = state.termination().raised() => return Ok(()),
        };
        log::debug(&cformat!("Neighbor <bold>{address}</bold> sat down next to us."));

        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_neighbor(stream, address, state).await {
                log::warn(&format!("Ring connection with {address} failed: {e}"));
            }
        });
    }
}

async fn handle_neighbor(
    stream: TcpStream,
    address: SocketAddr,
    state: Arc<PhilosopherState>,
) -> Result<()> {
    let mut connection = Connection::metered(stream, state.stats())?;

    while !state.termination().is_raised() {
        let request = tokio::select! {
            request = connection.recv::<RingRequest>() => request,
            _ = state.termination().raised() => break,
        };
        let request = match request {
            Ok(request) => request,
            Err(e) if e.is_retryable() => {
                // no response code fits, so the neighbor sees the connection close
                log::warn(&format!("Hanging up on {address} after a bad request: {e}"));
                break;
            }
            Err(Error::Closed(_)) => break,
            Err(e) => return Err(e),
        };

        let response = match request {
            RingRequest::GetForkStatus { port } => {
                let neighbor = PeerAddress::new(address.ip(), port);
                let (with_fork, dining_state) = state.fork_status(&neighbor).await;
                if with_fork.is_none() {
                    log::warn(&cformat!(
                        "<bold>{neighbor}</bold> asked for a fork but does not sit next to us."
                    ));
                }
                RingResponse::ForkStatus {
                    with_fork: with_fork.unwrap_or(false),
                    state: dining_state,
                }
            }
            RingRequest::PostToken { port } => {
                let neighbor = PeerAddress::new(address.ip(), port);
                if state.receive_token(&neighbor).await {
                    log::debug(&cformat!(
                        "Received the <yellow, bold>token</yellow, bold> from <bold>{neighbor}</bold>."
                    ));
                } else {
                    log::warn(&cformat!(
                        "<bold>{neighbor}</bold> passed a token but does not sit next to us."
                    ));
                }
                RingResponse::TokenAccepted
            }
        };
        connection.send(&response).await?;
    }

    Ok(())
}
