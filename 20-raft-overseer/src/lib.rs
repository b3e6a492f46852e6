//! Rendezvous overseer for a small Raft cluster.
//!
//! Nodes dial a central overseer, log in to receive a cluster identity, and
//! then exchange small STX/ETX framed packets with it: keep-alives while
//! idle, and a vote request once their election timeout runs out.
//!
//! - [`packet`] encodes and decodes the wire frames.
//! - [`connection`] buffers socket reads into whole frames.
//! - [`session`] is the overseer's per-connection state machine: sequence
//!   checks, ACK/NACK answers and eviction of misbehaving clients.
//! - [`membership`] hands out identities and tracks logged-in members.
//! - [`overseer`] accepts connections and runs one task per session.
//! - [`election`] is the node-side follower/candidate timer.
//! - [`node`] drives the timer over a connection to the overseer.
//! - [`cli`] parses the command-line interface for both roles.

pub mod cli;
pub mod connection;
pub mod election;
pub mod error;
pub mod membership;
pub mod node;
pub mod overseer;
pub mod packet;
pub mod session;

pub use error::{Error, Result};
