//! The philosopher's side of the connection to the manager.

use crate::{
    connection::Connection,
    log,
    message::{ControlRequest, ControlResponse},
    state::{Lifecycle, PhilosopherState},
    Error, Result,
};
use color_print::cformat;
use std::sync::Arc;

/// Answers the manager's requests; never sends one of its own.
pub struct ControlChannel {
    connection: Connection,
    state: Arc<PhilosopherState>,
    port: u16,
}

impl ControlChannel {
    pub fn new(connection: Connection, state: Arc<PhilosopherState>, port: u16) -> Self {
        Self {
            connection,
            state,
            port,
        }
    }

    /// Serves requests until `TIME_TO_DIE` has been answered, the manager goes
    /// away or it sends a request that cannot be read.
    ///
    /// Either way the philosopher's termination flag is raised on the way out.
    pub async fn run(mut self) -> Result<()> {
        let result = self.serve().await;
        self.state.termination().raise();
        result
    }

    async fn serve(&mut self) -> Result<()> {
        while !self.state.termination().is_raised() {
            let request = match self.connection.recv::<ControlRequest>().await {
                Ok(request) => request,
                Err(e) if e.is_retryable() => {
                    log::error(&format!("Hanging up on the manager after a bad request: {e}"));
                    return Ok(());
                }
                Err(Error::Closed(_)) => {
                    log::warn("The manager left before telling us to die.");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let response = self.respond(&request).await;
            self.connection.send(&response).await?;

            if let ControlResponse::FinallyDead(report) = response {
                log::info(&cformat!(
                    "Time to die after <bold>{}</bold> meals and <bold>{}</bold> deadlocks.",
                    report.meals,
                    report.deadlocks
                ));
                return Ok(());
            }
        }

        Ok(())
    }

    async fn respond(&self, request: &ControlRequest) -> ControlResponse {
        match request {
            ControlRequest::GetPort => ControlResponse::Port { port: self.port },
            ControlRequest::PostPairs { pairs, mode, first } => {
                log::info(&cformat!(
                    "Seated between <bold>{}</bold> and <bold>{}</bold>.",
                    pairs.left,
                    pairs.right
                ));
                if first.is_some() {
                    log::info(&cformat!("Starting with the <yellow, bold>token</yellow, bold>."));
                }
                self.state.assign(pairs.clone(), *mode, first.clone()).await;
                ControlResponse::PairsAccepted
            }
            ControlRequest::GetReady => ControlResponse::Ready {
                ready: self.state.lifecycle() >= Lifecycle::Ready,
            },
            ControlRequest::PostBegin => {
                self.state.advance(Lifecycle::Dining);
                ControlResponse::Begun
            }
            ControlRequest::GetStatusInfo => {
                ControlResponse::StatusInfo(self.state.status_report().await)
            }
            ControlRequest::TimeToDie => {
                ControlResponse::FinallyDead(self.state.status_report().await)
            }
        }
    }
}
