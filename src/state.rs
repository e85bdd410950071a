//! State a philosopher shares between its dining engine, its ring server
//! connections and its control channel.
//!
//! Each group sits behind its own lock: the [`Seat`] (forks, token, pair and
//! mode), the [`DiningState`] and the [`Stats`]. When both are needed the seat
//! is always locked before the stats.

use crate::{
    message::{DiningState, Mode, Pair, PeerAddress, StatusReport, Token},
    stats::{SharedStats, Stats},
    sync::Flag,
};
use std::collections::HashMap;
use tokio::sync::{watch, Mutex, RwLock};

/// Which forks a philosopher believes it holds, keyed by neighbor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForkTable(HashMap<PeerAddress, bool>);

impl ForkTable {
    pub fn for_pair(pair: &Pair) -> Self {
        Self(pair.neighbors().into_iter().map(|n| (n.clone(), false)).collect())
    }

    /// `None` when `neighbor` does not sit next to us.
    pub fn holds(&self, neighbor: &PeerAddress) -> Option<bool> {
        self.0.get(neighbor).copied()
    }

    pub fn take(&mut self, neighbor: &PeerAddress) {
        if let Some(held) = self.0.get_mut(neighbor) {
            *held = true;
        }
    }

    pub fn holds_all(&self) -> bool {
        !self.0.is_empty() && self.0.values().all(|held| *held)
    }

    pub fn put_down(&mut self) {
        self.0.values_mut().for_each(|held| *held = false);
    }
}

/// What a single fork status answer meant for the current eating attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The neighbor holds a fork we wanted; counted as a deadlock.
    Contended,
    /// The fork was free and is ours now.
    Taken,
    Nothing,
}

/// Outcome of the end of an eating attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Meal {
    Eaten { pass_token_to: Option<PeerAddress> },
    Hungry,
}

/// Forks, token and the neighbors they refer to.
#[derive(Debug, Clone)]
pub struct Seat {
    pair: Option<Pair>,
    mode: Mode,
    forks: ForkTable,
    token: Token,
}

impl Default for Seat {
    fn default() -> Self {
        Self {
            pair: None,
            mode: Mode::Token,
            forks: ForkTable::default(),
            token: Token::default(),
        }
    }
}

impl Seat {
    pub fn assign(&mut self, pair: Pair, mode: Mode, first: Option<PeerAddress>) {
        self.forks = ForkTable::for_pair(&pair);
        self.pair = Some(pair);
        self.mode = mode;
        if let Some(first) = first {
            self.token = Token::held_for(first);
        }
    }

    pub fn pair(&self) -> Option<&Pair> {
        self.pair.as_ref()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn forks(&self) -> &ForkTable {
        &self.forks
    }

    /// Holding the token, or playing without one.
    pub fn is_entitled(&self) -> bool {
        self.mode == Mode::WithoutToken || self.token.held
    }

    /// Applies a neighbor's fork status to our own fork table.
    ///
    /// `contended` remembers which neighbors were already counted during the
    /// current attempt, so each neighbor is counted at most once per attempt.
    pub fn observe(
        &mut self,
        neighbor: &PeerAddress,
        neighbor_has_fork: bool,
        contended: &mut HashMap<PeerAddress, bool>,
    ) -> Observation {
        let Some(mine) = self.forks.holds(neighbor) else {
            return Observation::Nothing;
        };
        if mine || !self.is_entitled() {
            return Observation::Nothing;
        }

        if neighbor_has_fork {
            let already = contended.entry(neighbor.clone()).or_insert(false);
            if *already {
                return Observation::Nothing;
            }
            *already = true;
            Observation::Contended
        } else {
            self.forks.take(neighbor);
            Observation::Taken
        }
    }

    /// Eats if both forks are held, putting them down and giving up the token.
    ///
    /// The token is cleared before it is forwarded so this philosopher never
    /// believes it holds a token it is handing over.
    pub fn finish_eating(&mut self) -> Meal {
        if !self.forks.holds_all() || !self.is_entitled() {
            return Meal::Hungry;
        }
        self.forks.put_down();

        let pass_token_to = match self.mode {
            Mode::Token => std::mem::take(&mut self.token).next_holder,
            Mode::WithoutToken => None,
        };
        Meal::Eaten { pass_token_to }
    }

    /// Takes the token from `sender`; it will be passed on to the other neighbor.
    ///
    /// Returns `false` when `sender` is not one of our neighbors.
    pub fn receive_token(&mut self, sender: &PeerAddress) -> bool {
        let Some(next) = self.pair.as_ref().and_then(|pair| pair.other_than(sender)) else {
            return false;
        };
        self.token = Token::held_for(next.clone());
        true
    }
}

/// How far a philosopher got in joining the table. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
    Seating,
    Paired,
    Ready,
    Dining,
}

pub struct PhilosopherState {
    seat: Mutex<Seat>,
    dining: RwLock<DiningState>,
    stats: SharedStats,
    lifecycle: watch::Sender<Lifecycle>,
    termination: Flag,
}

impl Default for PhilosopherState {
    fn default() -> Self {
        Self::new()
    }
}

impl PhilosopherState {
    pub fn new() -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle::Seating);
        Self {
            seat: Mutex::new(Seat::default()),
            dining: RwLock::new(DiningState::Thinking),
            stats: Stats::shared(),
            lifecycle,
            termination: Flag::new(false),
        }
    }

    pub fn termination(&self) -> &Flag {
        &self.termination
    }

    pub fn stats(&self) -> SharedStats {
        self.stats.clone()
    }

    pub async fn assign(&self, pair: Pair, mode: Mode, first: Option<PeerAddress>) {
        self.seat.lock().await.assign(pair, mode, first);
        self.advance(Lifecycle::Paired);
    }

    pub async fn pair(&self) -> Option<Pair> {
        self.seat.lock().await.pair().cloned()
    }

    pub async fn seat(&self) -> Seat {
        self.seat.lock().await.clone()
    }

    pub async fn dining_state(&self) -> DiningState {
        *self.dining.read().await
    }

    pub async fn set_dining_state(&self, state: DiningState) {
        *self.dining.write().await = state;
    }

    /// What we answer a neighbor asking about the fork we share with it.
    pub async fn fork_status(&self, neighbor: &PeerAddress) -> (Option<bool>, DiningState) {
        let with_fork = self.seat.lock().await.forks().holds(neighbor);
        (with_fork, self.dining_state().await)
    }

    pub async fn observe(
        &self,
        neighbor: &PeerAddress,
        neighbor_has_fork: bool,
        contended: &mut HashMap<PeerAddress, bool>,
    ) -> Observation {
        let mut seat = self.seat.lock().await;
        let observation = seat.observe(neighbor, neighbor_has_fork, contended);
        if observation == Observation::Contended {
            self.stats.lock().await.record_deadlock();
        }
        observation
    }

    /// Ends an eating attempt, recording the meal while the token is still ours.
    pub async fn finish_eating(&self) -> Meal {
        let mut seat = self.seat.lock().await;
        let mut stats = self.stats.lock().await;
        let meal = seat.finish_eating();
        if let Meal::Eaten { .. } = meal {
            stats.record_meal();
        }
        meal
    }

    pub async fn receive_token(&self, sender: &PeerAddress) -> bool {
        self.seat.lock().await.receive_token(sender)
    }

    pub async fn status_report(&self) -> StatusReport {
        let token = self.seat.lock().await.token().clone();
        let stats = *self.stats.lock().await;
        StatusReport {
            token,
            deadlocks: stats.deadlocks,
            meals: stats.meals,
            messages_sent: stats.messages_sent,
            messages_received: stats.messages_received,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// Moves the lifecycle forward to `next`; never moves it back.
    pub fn advance(&self, next: Lifecycle) {
        self.lifecycle.send_if_modified(|current| {
            if *current < next {
                *current = next;
                true
            } else {
                false
            }
        });
    }

    /// Waits until the lifecycle reached `stage`. Returns `false` if the
    /// philosopher was told to die first.
    pub async fn reached(&self, stage: Lifecycle) -> bool {
        let mut lifecycle = self.lifecycle.subscribe();
        tokio::select! {
            reached = lifecycle.wait_for(|current| *current >= stage) => reached.is_ok(),
            _ = self.termination.raised() => false,
        }
    }
}
