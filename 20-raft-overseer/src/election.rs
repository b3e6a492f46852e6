//! Election timing for a cluster node.
//!
//! The timer is a plain state machine driven with explicit instants so the
//! node loop owns every suspension and tests can move time by hand. On each
//! tick it decides between bidding for leadership and sending the next
//! keep-alive to the overseer.
//!
//! Only the follower-to-candidate step exists. Collecting votes, becoming
//! leader and stepping down on a leader heartbeat are left to a future vote
//! counting layer.

use std::time::{Duration, Instant};

use tracing::info;

use crate::error::{Error, Result};
use crate::membership::ClientId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, Clone, Copy)]
pub struct ElectionConfig {
    /// How long a follower waits for a leader before bidding.
    pub election_timeout: Duration,
    /// Minimum spacing between keep-alives sent to the overseer.
    pub keep_alive_interval: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            election_timeout: Duration::from_millis(10_000),
            keep_alive_interval: Duration::from_millis(3_000),
        }
    }
}

/// What the node should transmit next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    RequestVote { term: u64 },
    /// Send a keep-alive once `after` has passed.
    KeepAlive { after: Duration },
}

#[derive(Debug)]
pub struct ElectionTimer {
    config: ElectionConfig,
    role: Role,
    current_term: u64,
    last_leader_ping: Instant,
    last_transaction: Instant,
    cluster_id: Option<ClientId>,
}

impl ElectionTimer {
    pub fn new(config: ElectionConfig, now: Instant) -> Self {
        Self {
            config,
            role: Role::Follower,
            current_term: 0,
            last_leader_ping: now,
            last_transaction: now,
            cluster_id: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn cluster_id(&self) -> Option<ClientId> {
        self.cluster_id
    }

    pub fn assign_identity(&mut self, id: ClientId) {
        self.cluster_id = Some(id);
    }

    pub fn record_transaction(&mut self, now: Instant) {
        self.last_transaction = now;
    }

    /// Decides the next transmission. A follower that has not heard from a
    /// leader within the election timeout becomes a candidate for a new term;
    /// that step needs a cluster identity, and asking without one is an error.
    pub fn tick(&mut self, now: Instant) -> Result<Decision> {
        let silent_for = now.saturating_duration_since(self.last_leader_ping);
        if self.role == Role::Follower && silent_for > self.config.election_timeout {
            if !self.cluster_id.is_some_and(|id| id > 0) {
                return Err(Error::NotLoggedIn);
            }

            self.current_term += 1;
            self.role = Role::Candidate;
            info!(
                term = self.current_term,
                silent_ms = silent_for.as_millis() as u64,
                "election timeout elapsed, standing as candidate"
            );
            return Ok(Decision::RequestVote {
                term: self.current_term,
            });
        }

        let idle = now.saturating_duration_since(self.last_transaction);
        Ok(Decision::KeepAlive {
            after: self.config.keep_alive_interval.saturating_sub(idle),
        })
    }
}
