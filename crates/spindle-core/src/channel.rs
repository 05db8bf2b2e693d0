//! Transport channel over a unix stream.
//!
//! One `Channel` exclusively owns one end of the stream. Incoming bytes
//! accumulate in a pending buffer and are only consumed a whole frame at a
//! time, so a timeout or a slow peer never tears a message.

use std::io::{self, Read};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::protocol::{self, Message};

const READ_CHUNK: usize = 8 * 1024;

/// Framed, bidirectional message channel between parent and worker.
pub struct Channel {
    stream: UnixStream,
    pending: Vec<u8>,
}

impl Channel {
    /// Wrap a connected stream.
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            pending: Vec::new(),
        }
    }

    /// Send one message, flushing it to the peer.
    pub fn send(&mut self, message: &Message) -> Result<()> {
        protocol::write_message(&mut self.stream, message)
    }

    /// Receive one message, blocking until it arrives.
    pub fn receive(&mut self) -> Result<Message> {
        self.set_blocking(None)?;
        loop {
            if let Some(message) = self.take_pending_frame()? {
                return Ok(message);
            }
            match self.fill_pending() {
                Ok(()) => {}
                // Spurious wakeups in blocking mode; keep waiting.
                Err(ref e) if retryable(e) => {}
                Err(e) => return Err(map_read_error(e, &self.pending)),
            }
        }
    }

    /// Receive one message, waiting at most `timeout`.
    ///
    /// On expiry returns [`Error::Timeout`]; any partially received frame
    /// stays in the pending buffer, so a later receive picks up exactly
    /// where this one stopped.
    pub fn receive_timeout(&mut self, timeout: Duration) -> Result<Message> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.take_pending_frame()? {
                return Ok(message);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(timeout));
            }
            self.set_blocking(Some(remaining))?;
            match self.fill_pending() {
                Ok(()) => {}
                Err(ref e) if retryable(e) => return Err(Error::Timeout(timeout)),
                Err(e) => return Err(map_read_error(e, &self.pending)),
            }
        }
    }

    /// Poll for a message without blocking.
    ///
    /// Returns `Ok(None)` when no complete frame is available yet.
    pub fn try_receive(&mut self) -> Result<Option<Message>> {
        if let Some(message) = self.take_pending_frame()? {
            return Ok(Some(message));
        }
        self.stream
            .set_nonblocking(true)
            .map_err(|e| Error::Channel(format!("failed to switch channel mode: {e}")))?;
        let filled = self.fill_pending();
        let restore = self.stream.set_nonblocking(false);
        match filled {
            Ok(()) => {}
            Err(ref e) if retryable(e) => return Ok(None),
            Err(e) => return Err(map_read_error(e, &self.pending)),
        }
        restore.map_err(|e| Error::Channel(format!("failed to restore channel mode: {e}")))?;
        self.take_pending_frame()
    }

    fn set_blocking(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.stream
            .set_read_timeout(timeout)
            .map_err(|e| Error::Channel(format!("failed to set channel timeout: {e}")))
    }

    /// Pop one complete frame off the pending buffer, if present.
    fn take_pending_frame(&mut self) -> Result<Option<Message>> {
        match protocol::decode_frame(&self.pending)? {
            Some((message, consumed)) => {
                self.pending.drain(..consumed);
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    /// Read whatever the stream has into the pending buffer.
    fn fill_pending(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.stream.read(&mut chunk)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"));
        }
        self.pending.extend_from_slice(&chunk[..n]);
        Ok(())
    }
}

fn retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

fn map_read_error(err: io::Error, pending: &[u8]) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof && !pending.is_empty() {
        return Error::Channel(format!(
            "peer closed mid-frame with {} bytes outstanding",
            pending.len()
        ));
    }
    Error::Channel(format!("failed to read from peer: {err}"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::thread;

    use super::*;

    fn pair() -> (Channel, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        (Channel::new(a), b)
    }

    #[test]
    fn send_and_receive_across_threads() {
        let (a, b) = UnixStream::pair().unwrap();
        let sender = thread::spawn(move || {
            let mut channel = Channel::new(a);
            channel.send(&Message::YieldValue(vec![1, 2])).unwrap();
            channel.send(&Message::StreamEnd).unwrap();
        });
        let mut channel = Channel::new(b);
        assert_eq!(channel.receive().unwrap(), Message::YieldValue(vec![1, 2]));
        assert_eq!(channel.receive().unwrap(), Message::StreamEnd);
        sender.join().unwrap();
    }

    #[test]
    fn timeout_leaves_partial_frame_intact() {
        let (mut channel, mut raw) = pair();

        // Deliver only the first three bytes of a frame.
        let mut encoded = Vec::new();
        protocol::write_message(&mut encoded, &Message::YieldValue(vec![5, 6, 7])).unwrap();
        raw.write_all(&encoded[..3]).unwrap();
        raw.flush().unwrap();

        let err = channel.receive_timeout(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        // The rest arrives; the frame must reassemble exactly.
        raw.write_all(&encoded[3..]).unwrap();
        raw.flush().unwrap();
        assert_eq!(channel.receive().unwrap(), Message::YieldValue(vec![5, 6, 7]));
    }

    #[test]
    fn try_receive_returns_none_when_idle() {
        let (mut channel, _raw) = pair();
        assert!(channel.try_receive().unwrap().is_none());
    }

    #[test]
    fn try_receive_picks_up_queued_messages() {
        let (mut channel, raw) = pair();
        let mut sender = Channel::new(raw);
        sender.send(&Message::StatusQuery).unwrap();
        assert_eq!(channel.try_receive().unwrap(), Some(Message::StatusQuery));
        assert_eq!(channel.try_receive().unwrap(), None);
    }

    #[test]
    fn closed_peer_is_a_channel_error() {
        let (mut channel, raw) = pair();
        drop(raw);
        assert!(matches!(channel.receive(), Err(Error::Channel(_))));
    }

    #[test]
    fn close_mid_frame_is_a_channel_error() {
        let (mut channel, mut raw) = pair();
        let mut encoded = Vec::new();
        protocol::write_message(&mut encoded, &Message::YieldValue(vec![1])).unwrap();
        raw.write_all(&encoded[..4]).unwrap();
        drop(raw);
        match channel.receive() {
            Err(Error::Channel(msg)) => assert!(msg.contains("mid-frame")),
            other => panic!("expected channel error, got {other:?}"),
        }
    }

    #[test]
    fn buffered_messages_survive_peer_close() {
        let (mut channel, raw) = pair();
        let mut sender = Channel::new(raw);
        sender.send(&Message::YieldValue(vec![9])).unwrap();
        sender.send(&Message::StreamEnd).unwrap();
        drop(sender);
        assert_eq!(channel.receive().unwrap(), Message::YieldValue(vec![9]));
        assert_eq!(channel.receive().unwrap(), Message::StreamEnd);
        assert!(matches!(channel.receive(), Err(Error::Channel(_))));
    }
}
