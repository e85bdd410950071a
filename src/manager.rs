//! The manager seats the philosophers around the table and supervises the dinner.

use crate::{
    config::ManagerConfig,
    connection::Connection,
    log,
    message::{ControlRequest, ControlResponse, Mode, Pair, PeerAddress, StatusReport},
    Error, Result,
};
use color_print::cformat;
use futures::future::join_all;
use std::{
    future::Future,
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{Interval, MissedTickBehavior},
};

/// Where the manager is in the dinner. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunStage {
    Init,
    WaitingReady,
    Ready,
    Running,
}

/// Neighbors of every philosopher, by ring position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingAssignment(Vec<(PeerAddress, Pair)>);

impl RingAssignment {
    /// Seats `addresses` in the given order: everyone sits between the one
    /// before and the one after, wrapping around at both ends.
    pub fn compute(addresses: &[PeerAddress]) -> Self {
        let n = addresses.len();
        Self(
            addresses
                .iter()
                .enumerate()
                .map(|(i, address)| {
                    let left = addresses[(i + n - 1) % n].clone();
                    let right = addresses[(i + 1) % n].clone();
                    (address.clone(), Pair::new(left, right))
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn pair_of(&self, address: &PeerAddress) -> Option<&Pair> {
        self.0.iter().find(|(a, _)| a == address).map(|(_, pair)| pair)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(PeerAddress, Pair)> {
        self.0.iter()
    }

    /// The token source handed to `position`: only the first philosopher gets
    /// one, the last philosopher, who sits to its left.
    pub fn first_for(&self, position: usize) -> Option<PeerAddress> {
        if position != 0 {
            return None;
        }
        self.0.last().map(|(address, _)| address.clone())
    }
}

/// What the manager learned once the dinner is over.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub assignment: RingAssignment,
    /// Final statistics in ring order, one entry per philosopher that answered `TIME_TO_DIE`.
    pub final_stats: Vec<(PeerAddress, StatusReport)>,
}

impl RunReport {
    pub fn total_meals(&self) -> u64 {
        self.final_stats.iter().map(|(_, report)| report.meals).sum()
    }

    pub fn total_deadlocks(&self) -> u64 {
        self.final_stats.iter().map(|(_, report)| report.deadlocks).sum()
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    PostPairs {
        pairs: Pair,
        mode: Mode,
        first: Option<PeerAddress>,
        reply: Reply<()>,
    },
    AwaitReady(Reply<()>),
    Begin(Reply<()>),
    Status(Reply<StatusReport>),
    Die(Reply<StatusReport>),
}

/// The manager's end of one philosopher's control connection.
struct Guest {
    position: usize,
    address: Option<PeerAddress>,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<Result<()>>,
    gone: bool,
}

impl Guest {
    fn name(&self) -> String {
        match &self.address {
            Some(address) => address.to_string(),
            None => format!("philosopher #{}", self.position),
        }
    }

    async fn ask<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::Gone(self.name()))?;
        response.await.map_err(|_| Error::Gone(self.name()))?
    }
}

/// Serves one philosopher's control connection, one command at a time.
async fn attend(
    mut connection: Connection,
    position: usize,
    ports: mpsc::Sender<(usize, PeerAddress)>,
    mut commands: mpsc::Receiver<Command>,
) -> Result<()> {
    let port = connection
        .request_until(&ControlRequest::GetPort, |response: ControlResponse| {
            match response {
                ControlResponse::Port { port } => Some(port),
                _ => None,
            }
        })
        .await?;
    let address = PeerAddress::new(connection.peer_addr().ip(), port);
    log::info(&cformat!("Philosopher #{position} listens at <bold>{address}</bold>."));
    if ports.send((position, address)).await.is_err() {
        return Ok(());
    }

    while let Some(command) = commands.recv().await {
        match command {
            Command::PostPairs {
                pairs,
                mode,
                first,
                reply,
            } => {
                let request = ControlRequest::PostPairs { pairs, mode, first };
                let result = connection
                    .request_until(&request, |response: ControlResponse| {
                        matches!(response, ControlResponse::PairsAccepted).then_some(())
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::AwaitReady(reply) => {
                let result = connection
                    .request_until(&ControlRequest::GetReady, |response: ControlResponse| {
                        matches!(response, ControlResponse::Ready { ready: true }).then_some(())
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::Begin(reply) => {
                let result = connection
                    .request_until(&ControlRequest::PostBegin, |response: ControlResponse| {
                        matches!(response, ControlResponse::Begun).then_some(())
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::Status(reply) => {
                let result = connection
                    .request_until(&ControlRequest::GetStatusInfo, |response: ControlResponse| {
                        match response {
                            ControlResponse::StatusInfo(report) => Some(report),
                            _ => None,
                        }
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::Die(reply) => {
                let result = connection
                    .request_until(&ControlRequest::TimeToDie, |response: ControlResponse| {
                        match response {
                            ControlResponse::FinallyDead(report) => Some(report),
                            _ => None,
                        }
                    })
                    .await;
                let _ = reply.send(result);
                break;
            }
        }
    }

    Ok(())
}

pub struct Manager {
    config: ManagerConfig,
    listener: TcpListener,
    stage: RunStage,
    guests: Vec<Guest>,
}

impl Manager {
    pub async fn bind(config: ManagerConfig) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.port)).await?;
        log::info(&cformat!(
            "Initializing on port <bold>{}</bold>.",
            listener.local_addr()?.port()
        ));

        Ok(Self {
            config,
            listener,
            stage: RunStage::Init,
            guests: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    fn advance(&mut self, next: RunStage) {
        debug_assert!(next > self.stage, "{:?} cannot follow {:?}", next, self.stage);
        self.stage = next;
    }

    /// Runs a whole dinner lasting the configured duration.
    pub async fn run(self) -> Result<RunReport> {
        let duration = self.config.duration;
        self.run_until(async move { tokio::time::sleep(duration).await })
            .await
    }

    /// Runs a whole dinner, telling everyone to die once `expired` resolves.
    ///
    /// `expired` is only polled once the dinner has begun.
    pub async fn run_until(mut self, expired: impl Future<Output = ()>) -> Result<RunReport> {
        let addresses = self.seat_everyone().await?;

        let assignment = RingAssignment::compute(&addresses);
        self.distribute_pairs(&assignment).await;
        self.advance(RunStage::WaitingReady);

        log::info("Waiting all philosophers get ready.");
        let ready = self.every_guest(Command::AwaitReady).await;
        self.forget_gone("getting ready", ready);
        self.advance(RunStage::Ready);

        let begun = self.every_guest(Command::Begin).await;
        self.forget_gone("beginning dinner", begun);
        self.advance(RunStage::Running);
        log::info(&cformat!("<green, bold>Beginning dinner.</green, bold>"));

        self.supervise(expired).await;

        log::info("Time to die.");
        let dead = self.every_guest(Command::Die).await;
        let mut final_stats = Vec::new();
        for (guest, result) in self.guests.iter().filter(|g| !g.gone).zip(dead) {
            match (result, &guest.address) {
                (Ok(report), Some(address)) => {
                    log_status(address, &report);
                    final_stats.push((address.clone(), report));
                }
                (Err(e), _) => log::warn(&format!("No final stats from {}: {e}", guest.name())),
                (Ok(_), None) => {}
            }
        }

        for guest in self.guests.drain(..) {
            match guest.task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn(&format!(
                    "Connection with philosopher #{} ended: {e}",
                    guest.position
                )),
                Err(_) => log::error(&format!("Task of philosopher #{} failed.", guest.position)),
            }
        }

        let report = RunReport {
            assignment,
            final_stats,
        };
        log::info(&cformat!(
            "Dinner is over: <bold>{}</bold> meals, <bold>{}</bold> deadlocks.",
            report.total_meals(),
            report.total_deadlocks()
        ));
        Ok(report)
    }

    /// Accepts exactly the configured number of philosophers and learns their addresses.
    async fn seat_everyone(&mut self) -> Result<Vec<PeerAddress>> {
        let n = self.config.philosophers;
        log::info(&cformat!("Waiting for <bold>{n}</bold> philosophers."));

        let (ports, mut reported) = mpsc::channel(n);
        while self.guests.len() < n {
            let (stream, address) = self.listener.accept().await?;
            let connection = match Connection::new(stream) {
                Ok(connection) => connection,
                Err(e) => {
                    log::warn(&format!("Dropping connection from {address}: {e}"));
                    continue;
                }
            };
            let position = self.guests.len();
            log::info(&cformat!("Philosopher #{position} connected from <bold>{address}</bold>."));

            let (commands, receiver) = mpsc::channel(1);
            let task = tokio::spawn(attend(connection, position, ports.clone(), receiver));
            self.guests.push(Guest {
                position,
                address: None,
                commands,
                task,
                gone: false,
            });
        }
        drop(ports);
        log::info(&cformat!("<bold>{n}</bold> philosophers connected, distributing pairs."));

        while self.guests.iter().any(|g| g.address.is_none()) {
            match reported.recv().await {
                Some((position, address)) => self.guests[position].address = Some(address),
                None => {
                    // a task ended before reporting its port; nobody else will
                    std::future::pending::<()>().await;
                }
            }
        }

        Ok(self
            .guests
            .iter()
            .filter_map(|g| g.address.clone())
            .collect())
    }

    async fn distribute_pairs(&mut self, assignment: &RingAssignment) {
        let mode = self.config.mode;
        let results = join_all(self.guests.iter().zip(assignment.iter()).map(
            |(guest, (address, pairs))| {
                log::info(&cformat!(
                    "<bold>{address}</bold> sits between <bold>{}</bold> and <bold>{}</bold>.",
                    pairs.left,
                    pairs.right
                ));
                let first = match mode {
                    Mode::Token => assignment.first_for(guest.position),
                    Mode::WithoutToken => None,
                };
                let pairs = pairs.clone();
                guest.ask(move |reply| Command::PostPairs {
                    pairs,
                    mode,
                    first,
                    reply,
                })
            },
        ))
        .await;
        self.forget_gone("receiving pairs", results);
    }

    /// Polls everyone's statistics every poll interval until `expired` resolves.
    async fn supervise(&mut self, expired: impl Future<Output = ()>) {
        tokio::pin!(expired);
        let mut interval = status_ticker(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = &mut expired => return,
                _ = interval.tick() => {
                    let statuses = self.every_guest(Command::Status).await;
                    for (guest, status) in self.guests.iter().filter(|g| !g.gone).zip(&statuses) {
                        if let (Ok(report), Some(address)) = (status, &guest.address) {
                            log_status(address, report);
                        }
                    }
                    self.forget_gone("reporting status", statuses);
                }
            }
        }
    }

    /// Sends the same command to every guest still at the table, concurrently.
    ///
    /// Results are in the order of the guests that are not gone.
    async fn every_guest<T>(&self, command: impl Fn(Reply<T>) -> Command) -> Vec<Result<T>> {
        join_all(
            self.guests
                .iter()
                .filter(|g| !g.gone)
                .map(|guest| guest.ask(&command)),
        )
        .await
    }

    fn forget_gone<T>(&mut self, during: &str, results: Vec<Result<T>>) {
        for (guest, result) in self.guests.iter_mut().filter(|g| !g.gone).zip(results) {
            if let Err(e) = result {
                log::warn(&format!("{} left while {during}: {e}", guest.name()));
                guest.gone = true;
            }
        }
    }
}

/// Ticks every `period`. A late round pushes the next one back instead of
/// firing the missed ones back to back.
fn status_ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn log_status(address: &PeerAddress, report: &StatusReport) {
    let token = if report.token.held {
        cformat!(" <yellow, bold>[token]</yellow, bold>")
    } else {
        String::new()
    };
    log::info(&cformat!(
        "<bold>{address}</bold>{token} meals: <bold>{}</bold>, deadlocks: <bold>{}</bold>, sent: {}, received: {}",
        report.meals,
        report.deadlocks,
        report.messages_sent,
        report.messages_received
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(port: u16) -> PeerAddress {
        PeerAddress::new("127.0.0.1".parse().unwrap(), port)
    }

    #[test]
    fn three_philosophers_form_a_ring() {
        let addresses = [address(9001), address(9002), address(9003)];
        let assignment = RingAssignment::compute(&addresses);

        assert_eq!(
            assignment.pair_of(&address(9001)),
            Some(&Pair::new(address(9003), address(9002)))
        );
        assert_eq!(
            assignment.pair_of(&address(9002)),
            Some(&Pair::new(address(9001), address(9003)))
        );
        assert_eq!(
            assignment.pair_of(&address(9003)),
            Some(&Pair::new(address(9002), address(9001)))
        );
        assert_eq!(assignment.first_for(0), Some(address(9003)));
        assert_eq!(assignment.first_for(1), None);
        assert_eq!(assignment.first_for(2), None);
    }

    #[test]
    fn rings_close_for_every_size() {
        for n in 3..12u16 {
            let addresses: Vec<_> = (0..n).map(|i| address(9000 + i)).collect();
            let assignment = RingAssignment::compute(&addresses);
            assert_eq!(assignment.len(), usize::from(n));

            for (address, pair) in assignment.iter() {
                let right = assignment.pair_of(&pair.right).unwrap();
                assert_eq!(&right.left, address, "right neighbor's left must be us");
                let left = assignment.pair_of(&pair.left).unwrap();
                assert_eq!(&left.right, address, "left neighbor's right must be us");
            }

            let first = &addresses[0];
            let last = &addresses[usize::from(n) - 1];
            assert_eq!(
                assignment.pair_of(first),
                Some(&Pair::new(last.clone(), addresses[1].clone()))
            );
            assert_eq!(
                assignment.pair_of(last),
                Some(&Pair::new(addresses[usize::from(n) - 2].clone(), first.clone()))
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn status_polls_keep_their_pace_after_a_slow_round() {
        let period = Duration::from_millis(500);
        let mut ticker = status_ticker(period);
        ticker.tick().await;

        // a round of polls that took three periods
        tokio::time::sleep(period * 3 + Duration::from_millis(100)).await;
        ticker.tick().await;

        let late = tokio::time::Instant::now();
        ticker.tick().await;
        assert!(late.elapsed() >= period);
    }

    #[test]
    fn stages_are_ordered() {
        assert!(RunStage::Init < RunStage::WaitingReady);
        assert!(RunStage::WaitingReady < RunStage::Ready);
        assert!(RunStage::Ready < RunStage::Running);
    }
}
