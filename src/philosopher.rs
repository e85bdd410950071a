use crate::{
    config::PhilosopherConfig,
    connection::Connection,
    control::ControlChannel,
    dining::DiningEngine,
    log,
    message::StatusReport,
    ring::{self, RingClient},
    state::{Lifecycle, PhilosopherState},
    Result,
};
use color_print::cformat;
use std::{net::Ipv4Addr, sync::Arc};
use tokio::{net::TcpListener, task::JoinHandle};

/// A single peer: its ring server, its control channel and its dining engine.
pub struct Philosopher {
    config: PhilosopherConfig,
    listener: TcpListener,
    port: u16,
    state: Arc<PhilosopherState>,
}

impl Philosopher {
    /// Opens the ring server so neighbors can reach us before the manager seats anyone.
    pub async fn bind(config: PhilosopherConfig) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.port)).await?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            config,
            listener,
            port,
            state: Arc::new(PhilosopherState::new()),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> Arc<PhilosopherState> {
        self.state.clone()
    }

    /// Takes part in a whole dinner and returns the final statistics.
    pub async fn run(self) -> Result<StatusReport> {
        let Self {
            config,
            listener,
            port,
            state,
        } = self;

        let ring_server = tokio::spawn(ring::serve(listener, state.clone()));

        let connection = match Connection::connect(config.manager.as_str()).await {
            Ok(connection) => connection,
            Err(e) => {
                state.termination().raise();
                return Err(e);
            }
        };
        log::info(&cformat!(
            "Connected to the manager at <bold>{}</bold>, listening on port <bold>{port}</bold>.",
            config.manager
        ));
        let control = tokio::spawn(ControlChannel::new(connection, state.clone(), port).run());

        let dining = match Self::prepare(&config, port, &state).await {
            Ok(Some(engine)) => Some(tokio::spawn(engine.run())),
            Ok(None) => None,
            Err(e) => {
                log::error(&format!("Couldn't sit down at the table: {e}"));
                None
            }
        };

        if let Some(dining) = dining {
            report("Dining engine", dining).await;
        }
        report("Control channel", control).await;
        state.termination().raise();
        report("Ring server", ring_server).await;

        Ok(state.status_report().await)
    }

    /// Waits for our neighbors, connects to them and waits for the dinner to begin.
    ///
    /// `None` means the philosopher was told to die before the dinner began.
    async fn prepare(
        config: &PhilosopherConfig,
        port: u16,
        state: &Arc<PhilosopherState>,
    ) -> Result<Option<DiningEngine>> {
        log::info("Waiting to be seated.");
        if !state.reached(Lifecycle::Paired).await {
            return Ok(None);
        }
        let Some(pair) = state.pair().await else {
            return Ok(None);
        };

        let mut neighbors = Vec::with_capacity(2);
        for address in pair.neighbors() {
            neighbors.push(RingClient::connect(address.clone(), state).await?);
        }
        state.advance(Lifecycle::Ready);

        log::info("Waiting for the dinner to begin.");
        if !state.reached(Lifecycle::Dining).await {
            return Ok(None);
        }
        log::info(&cformat!("<green, bold>Dinner has begun.</green, bold>"));

        Ok(Some(DiningEngine::new(
            state.clone(),
            neighbors,
            port,
            config.delay,
        )))
    }
}

async fn report<T>(name: &str, task: JoinHandle<Result<T>>)
where
    T: Send + 'static,
{
    match task.await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => log::warn(&format!("{name} stopped: {e}")),
        Err(_) => log::error(&format!("{name} failed.")),
    }
}
