//! The thinking, eating, sleeping loop of a single philosopher.

use crate::{
    config::DelayRange,
    log,
    message::DiningState,
    ring::RingClient,
    state::{Meal, Observation, PhilosopherState},
    Result,
};
use color_print::cformat;
use std::{collections::HashMap, sync::Arc};

pub struct DiningEngine {
    state: Arc<PhilosopherState>,
    neighbors: Vec<RingClient>,
    own_port: u16,
    delay: DelayRange,
}

impl DiningEngine {
    /// `neighbors` are visited in the order given, once per eating attempt.
    pub fn new(
        state: Arc<PhilosopherState>,
        neighbors: Vec<RingClient>,
        own_port: u16,
        delay: DelayRange,
    ) -> Self {
        Self {
            state,
            neighbors,
            own_port,
            delay,
        }
    }

    /// Cycles through the states until the philosopher is told to die.
    pub async fn run(mut self) -> Result<()> {
        while !self.state.termination().is_raised() {
            match self.state.dining_state().await {
                DiningState::Thinking => {
                    log::debug("Thinking.");
                    tokio::time::sleep(self.delay.sample()).await;
                    self.state.set_dining_state(DiningState::Eating).await;
                }
                DiningState::Eating => {
                    if !self.eat().await? {
                        break;
                    }
                    self.state.set_dining_state(DiningState::Sleeping).await;
                }
                DiningState::Sleeping => {
                    log::debug("Sleeping.");
                    tokio::time::sleep(self.delay.sample()).await;
                    self.state.set_dining_state(DiningState::Thinking).await;
                }
            }
        }

        Ok(())
    }

    /// A single attempt to grab both forks and eat. Returns `false` when the
    /// philosopher was told to die in the middle of it.
    async fn eat(&mut self) -> Result<bool> {
        let mut contended = HashMap::new();

        for neighbor in self.neighbors.iter_mut() {
            let (with_fork, neighbor_state) = neighbor.fork_status(self.own_port).await?;
            if self.state.termination().is_raised() {
                return Ok(false);
            }
            log::debug(&format!(
                "{} fork is {with_fork} and state is {neighbor_state:?}",
                neighbor.address()
            ));

            let observation = self
                .state
                .observe(neighbor.address(), with_fork, &mut contended)
                .await;
            if observation == Observation::Contended {
                log::debug(&cformat!(
                    "<red>Contended</red> the fork shared with <bold>{}</bold>.",
                    neighbor.address()
                ));
            }
        }

        if let Meal::Eaten { pass_token_to } = self.state.finish_eating().await {
            log::debug(&cformat!("<green, bold>Eating</green, bold>."));

            if let Some(next) = pass_token_to {
                let Some(neighbor) = self.neighbors.iter_mut().find(|n| n.address() == &next)
                else {
                    log::error(&cformat!(
                        "Cannot pass the <yellow, bold>token</yellow, bold> to <bold>{next}</bold>, it does not sit next to us."
                    ));
                    return Ok(true);
                };
                neighbor.pass_token(self.own_port).await?;
                if self.state.termination().is_raised() {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }
}
