//! The byte stream underneath an association.
use std::{
    io::{ErrorKind, Read, Write},
    net::{Shutdown, TcpStream},
    time::Duration,
};

/// A blocking, connection oriented byte stream.
///
/// The state machine is agnostic to the concrete transport:
/// anything which can send bytes, receive bytes with a deadline
/// and be closed can carry an association.
pub trait Transport {
    /// Send all of the given bytes.
    fn send(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Receive some bytes into `buf`,
    /// waiting at most `timeout` if one is given.
    ///
    /// `Ok(0)` means that the peer closed the connection.
    /// Running out of time is reported as an error
    /// for which [`is_timeout`] returns `true`.
    fn receive(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> std::io::Result<usize>;

    /// Close the connection in both directions.
    fn close(&mut self) -> std::io::Result<()>;
}

/// Whether an I/O error means that a receive ran out of time.
pub fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

impl Transport for TcpStream {
    fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.write_all(bytes)?;
        self.flush()
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> std::io::Result<usize> {
        // a zero read timeout is rejected by the socket API
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        self.set_read_timeout(timeout)?;
        self.read(buf)
    }

    fn close(&mut self) -> std::io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        (**self).send(bytes)
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> std::io::Result<usize> {
        (**self).receive(buf, timeout)
    }

    fn close(&mut self) -> std::io::Result<()> {
        (**self).close()
    }
}
