use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::packet::{ETX, MIN_FRAME_LEN, Packet};

/// Upper bound on buffered bytes while waiting for a terminator.
pub const MAX_FRAME_LEN: usize = 1024;

const READ_CHUNK: usize = 64;

/// Where a frame ends once a terminator has shown up past the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// The whole buffer is one frame. Responses carry arguments that may
    /// hold ETX-valued bytes, and only one of them is ever in flight.
    WholeBuffer,
    /// The frame ends at the first terminator and any bytes after it are
    /// kept for the next call. Requests carry no arguments, so this splits
    /// frames a client wrote back to back.
    FirstTerminator,
}

/// Accumulates bytes from a connection until a whole frame has arrived.
///
/// The terminator is only looked for past the fixed header so a sequence
/// number equal to ETX does not end the frame early.
pub struct ConnectionReader<R> {
    inner: R,
    buffer: Vec<u8>,
    framing: Framing,
}

impl<R> ConnectionReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self::with_framing(inner, Framing::WholeBuffer)
    }

    pub fn with_framing(inner: R, framing: Framing) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(READ_CHUNK),
            framing,
        }
    }

    /// Returns `None` if the peer closes the connection before a frame completes.
    pub async fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(end) = self.frame_end() {
                let rest = self.buffer.split_off(end);
                return Ok(Some(std::mem::replace(&mut self.buffer, rest)));
            }
            if self.buffer.len() > MAX_FRAME_LEN {
                return Ok(Some(std::mem::take(&mut self.buffer)));
            }

            self.buffer.reserve(READ_CHUNK);
            let read = self.inner.read_buf(&mut self.buffer).await?;
            tracing::trace!(read, buffered = self.buffer.len(), "raw read");
            if read == 0 {
                if !self.buffer.is_empty() {
                    tracing::debug!(
                        dropped = self.buffer.len(),
                        "connection closed mid-frame"
                    );
                    self.buffer.clear();
                }
                return Ok(None);
            }
        }
    }

    fn frame_end(&self) -> Option<usize> {
        let header = MIN_FRAME_LEN - 1;
        let offset = self
            .buffer
            .get(header..)?
            .iter()
            .position(|&byte| byte == ETX)?;
        Some(match self.framing {
            Framing::WholeBuffer => self.buffer.len(),
            Framing::FirstTerminator => header + offset + 1,
        })
    }
}

pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&packet.encode()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Command, RS, STX};

    #[tokio::test]
    async fn reads_a_frame_written_in_pieces() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = ConnectionReader::new(server);

        let writer = tokio::spawn(async move {
            for piece in [&[STX][..], &[1, RS], &[b'C'], &[ETX]] {
                client.write_all(piece).await.expect("write piece");
                client.flush().await.expect("flush");
                tokio::task::yield_now().await;
            }
            client
        });

        let frame = reader.next_frame().await.expect("read").expect("frame");
        assert_eq!(frame, vec![STX, 1, RS, b'C', ETX]);
        drop(writer.await.expect("writer task"));
    }

    #[tokio::test]
    async fn sequence_equal_to_etx_does_not_end_the_frame() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = ConnectionReader::new(server);

        client.write_all(&[STX, ETX]).await.expect("write head");
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            reader.next_frame(),
        )
        .await;
        assert!(pending.is_err(), "two bytes are not a frame");

        client.write_all(&[RS, b'C', ETX]).await.expect("write tail");
        let frame = reader.next_frame().await.expect("read").expect("frame");
        let packet = Packet::decode(&frame).expect("decodes");
        assert_eq!(packet, Packet::new(ETX, Command::KeepAlive));
    }

    #[tokio::test]
    async fn back_to_back_requests_are_split_in_order() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = ConnectionReader::with_framing(server, Framing::FirstTerminator);

        let mut burst = Packet::new(1, Command::KeepAlive).encode();
        burst.extend(Packet::new(2, Command::KeepAlive).encode());
        burst.extend([STX, 3]);
        client.write_all(&burst).await.expect("write burst");

        for sequence in [1, 2] {
            let frame = reader.next_frame().await.expect("read").expect("frame");
            assert_eq!(
                Packet::decode(&frame).expect("decodes"),
                Packet::new(sequence, Command::KeepAlive)
            );
        }

        client.write_all(&[RS, b'D', ETX]).await.expect("write tail");
        let frame = reader.next_frame().await.expect("read").expect("frame");
        assert_eq!(
            Packet::decode(&frame).expect("decodes"),
            Packet::new(3, Command::RequestVote)
        );
    }

    #[tokio::test]
    async fn whole_buffer_framing_keeps_etx_valued_arguments() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = ConnectionReader::new(server);
        let ack = Packet::ack(0).with_argument(u64::from(ETX));

        write_packet(&mut client, &ack).await.expect("write");
        let frame = reader.next_frame().await.expect("read").expect("frame");
        assert_eq!(Packet::decode(&frame).expect("decodes"), ack);
    }

    #[tokio::test]
    async fn closed_connection_yields_none() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = ConnectionReader::new(server);
        drop(client);
        assert!(reader.next_frame().await.expect("read").is_none());
    }

    #[tokio::test]
    async fn partial_frame_then_close_yields_none() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = ConnectionReader::new(server);
        client.write_all(&[STX, 1, RS]).await.expect("write");
        drop(client);
        assert!(reader.next_frame().await.expect("read").is_none());
    }

    #[tokio::test]
    async fn unterminated_flood_is_surrendered() {
        let (mut client, server) = tokio::io::duplex(4096);
        let mut reader = ConnectionReader::new(server);
        client
            .write_all(&vec![0x41; MAX_FRAME_LEN + 10])
            .await
            .expect("write");

        let frame = reader.next_frame().await.expect("read").expect("frame");
        assert!(frame.len() > MAX_FRAME_LEN);
        assert!(Packet::decode(&frame).is_err());
    }

    #[tokio::test]
    async fn write_packet_sends_encoded_frame() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = ConnectionReader::new(server);
        let packet = Packet::ack(0).with_argument(1);

        write_packet(&mut client, &packet).await.expect("write");
        let frame = reader.next_frame().await.expect("read").expect("frame");
        assert_eq!(Packet::decode(&frame).expect("decodes"), packet);
    }
}
