//! Byte transport between the debug bridge and a remote client.
//!
//! The application supplies the actual connection (a socket, a pipe, an
//! in-memory buffer) as a [`Transport`]. [`DebugChannel`] adds the behaviour
//! the engine's debug protocol expects: reads block until at least one byte
//! arrives, a dropped connection is noticed on every operation and attaching
//! waits a bounded time for a client.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

pub trait Transport {
    /// Bytes that can be read without blocking.
    fn peek(&mut self) -> io::Result<usize>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;
    fn is_connected(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("debug client disconnected")]
    Disconnected,
    #[error("no debug client attached within {0:?}")]
    AttachTimeout(Duration),
    #[error("debug transport failed: {0}")]
    Io(#[from] io::Error),
}

pub struct DebugChannel {
    transport: Box<dyn Transport>,
    poll_interval: Duration,
    idle: Option<Box<dyn FnMut()>>,
}

impl DebugChannel {
    pub fn new(transport: Box<dyn Transport>, poll_interval: Duration) -> Self {
        DebugChannel {
            transport,
            poll_interval,
            idle: None,
        }
    }

    /// Runs while a read is waiting for data, so the application can keep
    /// servicing its own event loop.
    pub fn set_idle_hook(&mut self, hook: impl FnMut() + 'static) {
        self.idle = Some(Box::new(hook));
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    fn check_connected(&self) -> Result<(), TransportError> {
        if self.transport.is_connected() {
            Ok(())
        } else {
            warn!("debug connection reset");
            Err(TransportError::Disconnected)
        }
    }

    fn idle(&mut self) {
        if let Some(hook) = self.idle.as_mut() {
            hook();
        }
    }

    pub fn peek(&mut self) -> Result<usize, TransportError> {
        self.check_connected()?;
        self.idle();
        Ok(self.transport.peek()?)
    }

    /// Blocks until at least one byte is available, then reads as much as
    /// fits in `buf`.
    pub fn read_blocking(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            self.check_connected()?;
            let available = self.transport.peek()?;
            if available > 0 {
                let n = available.min(buf.len());
                return Ok(self.transport.read(&mut buf[..n])?);
            }
            self.idle();
            thread::sleep(self.poll_interval);
        }
    }

    pub fn write_all(&mut self, mut data: &[u8]) -> Result<(), TransportError> {
        while !data.is_empty() {
            self.check_connected()?;
            let n = self.transport.write(data)?;
            if n == 0 {
                return Err(TransportError::Disconnected);
            }
            data = &data[n..];
        }
        Ok(())
    }

    /// Waits for a client to connect, polling at the channel's interval.
    pub fn wait_for_attach(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        while !self.transport.is_connected() {
            if Instant::now() >= deadline {
                return Err(TransportError::AttachTimeout(timeout));
            }
            self.idle();
            thread::sleep(self.poll_interval);
        }
        debug!("debug client attached");
        Ok(())
    }
}
