//! Overseer wire format.
//!
//! Every transmission is one frame:
//!
//! ```text
//! STX, sequence, RS, command, [RS, arg0, RS, arg1, ...], ETX
//! ```
//!
//! Integers (sequence, command, arguments) are written as the shortest
//! little-endian byte string that holds them. Requests are answered by a frame
//! carrying the same sequence number with ACK or NACK as its command; a login
//! ACK carries the assigned cluster identity as its first argument and a NACK
//! carries the failure reason.

use std::fmt;

use crate::error::{Error, Result};

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const RS: u8 = 0x1E;

/// Shortest possible frame: STX, sequence, RS, command, ETX.
pub const MIN_FRAME_LEN: usize = 5;

const MAX_INTEGER_WIDTH: usize = std::mem::size_of::<u64>();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Login = b'A',
    Logout = b'B',
    KeepAlive = b'C',
    RequestVote = b'D',
    Ack = 0x06,
    Nack = 0x15,
    InvalidCmd = b'X',
    MalformedPkt = b'Y',
    GeneralFailure = b'Z',
}

impl Command {
    pub fn byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u64> for Command {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self> {
        let command = match value {
            0x41 => Command::Login,
            0x42 => Command::Logout,
            0x43 => Command::KeepAlive,
            0x44 => Command::RequestVote,
            0x06 => Command::Ack,
            0x15 => Command::Nack,
            0x58 => Command::InvalidCmd,
            0x59 => Command::MalformedPkt,
            0x5A => Command::GeneralFailure,
            other => return Err(Error::UnknownCommand(other)),
        };
        Ok(command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Kept at decoded width so out-of-range values can be reported instead of truncated.
    pub sequence: u64,
    pub command: Command,
    pub arguments: Vec<u64>,
}

impl Packet {
    pub fn new(sequence: u8, command: Command) -> Self {
        Self {
            sequence: u64::from(sequence),
            command,
            arguments: Vec::new(),
        }
    }

    pub fn with_argument(mut self, argument: u64) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn ack(sequence: u8) -> Self {
        Self::new(sequence, Command::Ack)
    }

    pub fn nack(sequence: u8, reason: Command) -> Self {
        Self::new(sequence, Command::Nack).with_argument(u64::from(reason.byte()))
    }

    pub fn argument(&self, index: usize) -> Option<u64> {
        self.arguments.get(index).copied()
    }

    /// Structural check only: the sequence must fit in one byte.
    pub fn validate(&self) -> bool {
        self.sequence <= u64::from(u8::MAX)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(MIN_FRAME_LEN + 2 * self.arguments.len());
        frame.push(STX);
        put_integer(&mut frame, self.sequence);
        frame.push(RS);
        frame.push(self.command.byte());
        for argument in &self.arguments {
            frame.push(RS);
            put_integer(&mut frame, *argument);
        }
        frame.push(ETX);
        frame
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        let inner = match frame {
            [STX, inner @ .., ETX] => inner,
            _ => return Err(Error::MalformedFrame("frame must be wrapped in STX and ETX")),
        };

        let mut fields = inner.split(|&byte| byte == RS);
        let sequence = fields
            .next()
            .ok_or(Error::MalformedFrame("missing sequence"))
            .and_then(read_integer)?;
        let command = fields
            .next()
            .ok_or(Error::MalformedFrame("missing command"))
            .and_then(read_integer)
            .and_then(Command::try_from)?;

        let rest: Vec<&[u8]> = fields.collect();
        let arguments = match rest.as_slice() {
            [] | [[]] => Vec::new(),
            chunks => chunks
                .iter()
                .map(|chunk| read_integer(chunk))
                .collect::<Result<Vec<_>>>()?,
        };

        Ok(Self {
            sequence,
            command,
            arguments,
        })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {:?}", self.sequence, self.command)?;
        if !self.arguments.is_empty() {
            write!(f, " {:?}", self.arguments)?;
        }
        Ok(())
    }
}

fn put_integer(frame: &mut Vec<u8>, value: u64) {
    let bytes = value.to_le_bytes();
    let width = MAX_INTEGER_WIDTH - (value.leading_zeros() as usize / 8);
    frame.extend_from_slice(&bytes[..width.max(1)]);
}

fn read_integer(bytes: &[u8]) -> Result<u64> {
    if bytes.len() > MAX_INTEGER_WIDTH {
        return Err(Error::MalformedFrame("integer field wider than eight bytes"));
    }
    let mut buf = [0u8; MAX_INTEGER_WIDTH];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}
