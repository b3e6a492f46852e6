//! Per-connection protocol state on the overseer side.
//!
//! A session only exists once a login frame has been accepted. From then on
//! each frame is checked against the expected sequence number and answered
//! with an ACK or a NACK. The expected sequence advances on every frame,
//! accepted or not, so a client that falls out of step has to catch up with
//! the next number rather than retry the old one. Too many rejections in a
//! row close the session.

use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::membership::ClientId;
use crate::packet::{Command, Packet};

pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closed(CloseReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    LoggedOut,
    Evicted,
}

#[derive(Debug)]
pub enum Outcome {
    Accepted(Command),
    Rejected(Error),
}

/// The answer to one frame, plus how the session judged it.
#[derive(Debug)]
pub struct Transaction {
    pub response: Packet,
    pub outcome: Outcome,
}

impl Transaction {
    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, Outcome::Accepted(_))
    }
}

#[derive(Debug)]
pub struct ClientSession {
    client_id: ClientId,
    state: SessionState,
    expected_sequence: u8,
    consecutive_failures: u32,
    max_consecutive_failures: u32,
}

impl ClientSession {
    /// Handles the handshake frame. On success returns the new session and
    /// the ACK carrying its identity; `allocate` is only called for a valid
    /// login, so rejected handshakes never consume an identity. A limit of
    /// zero evicts on the first rejection, the same as a limit of one.
    pub fn login<F>(
        frame: &[u8],
        max_consecutive_failures: u32,
        allocate: F,
    ) -> Result<(Self, Packet)>
    where
        F: FnOnce() -> ClientId,
    {
        let packet = Packet::decode(frame)?;
        let sequence = checked_sequence(&packet)?;
        if packet.command != Command::Login {
            return Err(Error::HandshakeRejected(packet.command));
        }

        let client_id = allocate();
        info!(client_id, sequence, "client logged in");

        let session = Self {
            client_id,
            state: SessionState::Active,
            expected_sequence: 1,
            consecutive_failures: 0,
            max_consecutive_failures,
        };
        Ok((session, Packet::ack(sequence).with_argument(client_id)))
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed(_))
    }

    pub fn expected_sequence(&self) -> u8 {
        self.expected_sequence
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Judges one frame. Returns `None` once the session is closed.
    pub fn process(&mut self, frame: &[u8]) -> Option<Transaction> {
        if self.is_closed() {
            return None;
        }

        let expected = self.expected_sequence;
        self.expected_sequence = expected.wrapping_add(1);

        let decoded = Packet::decode(frame);
        // Responses echo the number they answer when there is a usable one.
        let reply_sequence = decoded
            .as_ref()
            .ok()
            .and_then(|packet| checked_sequence(packet).ok())
            .unwrap_or(expected);

        let transaction = match decoded.and_then(|packet| self.check(packet, expected)) {
            Ok(packet) => self.accept(packet),
            Err(err) => self.reject(err, reply_sequence),
        };
        Some(transaction)
    }

    fn check(&self, packet: Packet, expected: u8) -> Result<Packet> {
        let sequence = checked_sequence(&packet)?;
        if sequence != expected {
            return Err(Error::SequenceMismatch {
                expected,
                received: packet.sequence,
            });
        }
        Ok(packet)
    }

    fn accept(&mut self, packet: Packet) -> Transaction {
        self.consecutive_failures = 0;

        let sequence = self.expected_sequence.wrapping_sub(1);
        let client_id = self.client_id;
        let response = match packet.command {
            Command::Login => Packet::ack(sequence).with_argument(client_id),
            Command::Logout => {
                info!(client_id, sequence, "client logged out");
                self.state = SessionState::Closed(CloseReason::LoggedOut);
                Packet::ack(sequence)
            }
            Command::RequestVote => {
                info!(client_id, sequence, "vote requested");
                Packet::ack(sequence)
            }
            Command::KeepAlive
            | Command::Ack
            | Command::Nack
            | Command::InvalidCmd
            | Command::MalformedPkt
            | Command::GeneralFailure => Packet::ack(sequence),
        };

        info!(client_id, sequence, command = ?packet.command, "transaction accepted");
        Transaction {
            response,
            outcome: Outcome::Accepted(packet.command),
        }
    }

    fn reject(&mut self, err: Error, reply_sequence: u8) -> Transaction {
        self.consecutive_failures += 1;
        let client_id = self.client_id;

        warn!(
            client_id,
            sequence = reply_sequence,
            failures = self.consecutive_failures,
            error = %err,
            "transaction rejected"
        );

        if self.consecutive_failures >= self.max_consecutive_failures {
            error!(
                client_id,
                failures = self.consecutive_failures,
                "evicting client after repeated failures"
            );
            self.state = SessionState::Closed(CloseReason::Evicted);
        }

        Transaction {
            response: Packet::nack(reply_sequence, Command::GeneralFailure),
            outcome: Outcome::Rejected(err),
        }
    }
}

fn checked_sequence(packet: &Packet) -> Result<u8> {
    if !packet.validate() {
        return Err(Error::StructuralInvalid(packet.sequence));
    }
    Ok(packet.sequence as u8)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::packet::{ETX, RS, STX};

    fn frame(sequence: u8, command: Command) -> Vec<u8> {
        Packet::new(sequence, command).encode()
    }

    fn logged_in(max_failures: u32) -> ClientSession {
        let (session, _) = ClientSession::login(&frame(0, Command::Login), max_failures, || 1)
            .expect("login accepted");
        session
    }

    #[test]
    fn login_acks_with_allocated_identity() {
        let (session, ack) =
            ClientSession::login(&frame(0, Command::Login), 5, || 42).expect("login accepted");
        assert_eq!(session.client_id(), 42);
        assert_eq!(session.expected_sequence(), 1);
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(ack, Packet::ack(0).with_argument(42));
    }

    #[test]
    fn rejected_handshake_does_not_allocate() {
        let allocated = Cell::new(false);
        let allocate = || {
            allocated.set(true);
            1
        };

        let result = ClientSession::login(&frame(0, Command::KeepAlive), 5, allocate);
        assert!(matches!(result, Err(Error::HandshakeRejected(Command::KeepAlive))));
        assert!(!allocated.get());

        let result = ClientSession::login(&[STX, 0, RS, b'Q', ETX], 5, || 1);
        assert!(matches!(result, Err(Error::UnknownCommand(_))));

        let result = ClientSession::login(b"hello", 5, || 1);
        assert!(matches!(result, Err(Error::MalformedFrame(_))));
    }

    #[test]
    fn in_order_sequences_are_all_acked() {
        let mut session = logged_in(5);
        for sequence in 1..=5 {
            let tx = session
                .process(&frame(sequence, Command::KeepAlive))
                .expect("session open");
            assert!(tx.is_accepted());
            assert_eq!(tx.response, Packet::ack(sequence));
            assert_eq!(session.consecutive_failures(), 0);
        }
        assert_eq!(session.expected_sequence(), 6);
    }

    #[test]
    fn gap_advances_expected_sequence_past_it() {
        let mut session = logged_in(5);

        let first = session.process(&frame(1, Command::KeepAlive)).unwrap();
        assert!(first.is_accepted());

        let second = session.process(&frame(5, Command::KeepAlive)).unwrap();
        assert!(matches!(
            second.outcome,
            Outcome::Rejected(Error::SequenceMismatch { expected: 2, received: 5 })
        ));
        assert_eq!(second.response.command, Command::Nack);
        assert_eq!(second.response.sequence, 5);
        assert_eq!(session.consecutive_failures(), 1);

        let third = session.process(&frame(2, Command::KeepAlive)).unwrap();
        assert!(matches!(
            third.outcome,
            Outcome::Rejected(Error::SequenceMismatch { expected: 3, received: 2 })
        ));
        assert_eq!(session.consecutive_failures(), 2);
        assert!(!session.is_closed());
    }

    #[test]
    fn acceptance_resets_failure_count() {
        let mut session = logged_in(5);
        session.process(&frame(9, Command::KeepAlive)).unwrap();
        session.process(&frame(9, Command::KeepAlive)).unwrap();
        assert_eq!(session.consecutive_failures(), 2);

        let tx = session.process(&frame(3, Command::KeepAlive)).unwrap();
        assert!(tx.is_accepted());
        assert_eq!(session.consecutive_failures(), 0);
    }

    #[test]
    fn third_consecutive_failure_evicts() {
        let mut session = logged_in(3);
        for _ in 0..2 {
            session.process(&frame(200, Command::KeepAlive)).unwrap();
            assert!(!session.is_closed());
        }

        let tx = session.process(&frame(200, Command::KeepAlive)).unwrap();
        assert_eq!(tx.response.command, Command::Nack);
        assert_eq!(session.state(), SessionState::Closed(CloseReason::Evicted));
        assert!(session.process(&frame(4, Command::KeepAlive)).is_none());
    }

    #[test]
    fn zero_failure_limit_evicts_on_first_rejection() {
        let mut session = logged_in(0);
        let tx = session.process(&frame(9, Command::KeepAlive)).unwrap();
        assert_eq!(tx.response, Packet::nack(9, Command::GeneralFailure));
        assert_eq!(session.state(), SessionState::Closed(CloseReason::Evicted));
    }

    #[test]
    fn malformed_and_unknown_frames_are_nacked_with_expected_sequence() {
        let mut session = logged_in(5);

        let tx = session.process(b"garbage").unwrap();
        assert!(matches!(tx.outcome, Outcome::Rejected(Error::MalformedFrame(_))));
        assert_eq!(tx.response, Packet::nack(1, Command::GeneralFailure));

        let tx = session.process(&[STX, 2, RS, b'Q', ETX]).unwrap();
        assert!(matches!(tx.outcome, Outcome::Rejected(Error::UnknownCommand(_))));
        assert_eq!(tx.response, Packet::nack(2, Command::GeneralFailure));
    }

    #[test]
    fn out_of_range_sequence_is_structurally_invalid() {
        let mut session = logged_in(5);
        let tx = session.process(&[STX, 0x01, 0x01, RS, b'C', ETX]).unwrap();
        assert!(matches!(tx.outcome, Outcome::Rejected(Error::StructuralInvalid(257))));
        assert_eq!(tx.response.sequence, 1);
    }

    #[test]
    fn logout_is_acked_then_closes() {
        let mut session = logged_in(5);
        let tx = session.process(&frame(1, Command::Logout)).unwrap();
        assert_eq!(tx.response, Packet::ack(1));
        assert_eq!(session.state(), SessionState::Closed(CloseReason::LoggedOut));
        assert!(session.process(&frame(2, Command::KeepAlive)).is_none());
    }

    #[test]
    fn request_vote_is_acked() {
        let mut session = logged_in(5);
        let tx = session.process(&frame(1, Command::RequestVote)).unwrap();
        assert!(matches!(tx.outcome, Outcome::Accepted(Command::RequestVote)));
        assert_eq!(tx.response, Packet::ack(1));
    }

    #[test]
    fn repeated_login_returns_existing_identity() {
        let mut session = logged_in(5);
        let tx = session.process(&frame(1, Command::Login)).unwrap();
        assert_eq!(tx.response, Packet::ack(1).with_argument(1));
    }

    #[test]
    fn expected_sequence_wraps_after_255() {
        let mut session = logged_in(5);
        for sequence in 1..=255u8 {
            assert!(session.process(&frame(sequence, Command::KeepAlive)).unwrap().is_accepted());
        }
        assert_eq!(session.expected_sequence(), 0);
        assert!(session.process(&frame(0, Command::KeepAlive)).unwrap().is_accepted());
        assert!(session.process(&frame(1, Command::KeepAlive)).unwrap().is_accepted());
    }
}
