use std::net::{ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use anyhow::Error;

use crate::types::TelemetryItem;

pub mod live_metrics;
pub mod sample;

#[cfg(feature = "cli")]
pub mod server;

pub use live_metrics::LiveMetrics;
pub use sample::Sample;

#[cfg(feature = "cli")]
pub use server::Server;

const BUFSIZE: usize = 8192;

/// Returned by a middleware that cannot accept an item right now. The item is handed back when
/// the caller may retry it.
#[derive(Debug)]
pub struct Overloaded {
    pub item: Option<TelemetryItem>,
}

impl Middleware for Box<dyn Middleware> {
    fn join(&mut self) -> Result<(), Error> {
        self.as_mut().join()
    }
    fn poll(&mut self) -> Result<(), Overloaded> {
        self.as_mut().poll()
    }
    fn submit(&mut self, item: TelemetryItem) -> Result<(), Overloaded> {
        self.as_mut().submit(item)
    }
}

pub trait Middleware {
    /// Releases background resources. Called once, after the last `submit`.
    fn join(&mut self) -> Result<(), Error> {
        Ok(())
    }
    fn poll(&mut self) -> Result<(), Overloaded> {
        Ok(())
    }
    fn submit(&mut self, item: TelemetryItem) -> Result<(), Overloaded>;
}

/// Final step of a chain: sends serialized items to another proxy or collector over UDP,
/// newline-separated and batched into datagrams.
pub struct Upstream {
    socket: UdpSocket,
    buffer: [u8; BUFSIZE],
    buf_used: usize,
    last_sent_at: Option<Instant>,
}

impl Upstream {
    pub fn new<A>(upstream: A) -> Result<Self, Error>
    where
        A: ToSocketAddrs,
    {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        // connect() lets the kernel skip the route lookup on every send
        socket.connect(upstream)?;
        Ok(Upstream {
            socket,
            buffer: [0; BUFSIZE],
            buf_used: 0,
            last_sent_at: None,
        })
    }

    fn send(&self, datagram: &[u8]) {
        match self.socket.send(datagram) {
            Ok(bytes) if bytes != datagram.len() => {
                log::warn!(
                    "tried to send {} bytes upstream but only sent {}",
                    datagram.len(),
                    bytes
                );
            }
            Ok(_) => {}
            Err(err) => log::warn!("failed to send to upstream: {err}"),
        }
    }

    fn flush(&mut self) {
        if self.buf_used > 0 {
            self.send(&self.buffer[..self.buf_used]);
            self.buf_used = 0;
        }
        self.last_sent_at = Some(Instant::now());
    }

    fn timed_flush(&mut self) {
        if self
            .last_sent_at
            .map_or(true, |at| at.elapsed() > Duration::from_secs(1))
        {
            // Nothing sent in a while, don't let buffered items go stale.
            self.flush();
        }
    }
}

impl Drop for Upstream {
    fn drop(&mut self) {
        self.flush();
    }
}

impl Middleware for Upstream {
    fn join(&mut self) -> Result<(), Error> {
        self.flush();
        Ok(())
    }

    fn submit(&mut self, item: TelemetryItem) -> Result<(), Overloaded> {
        let line = item.serialize();
        let line_len = line.len();
        if line_len + 1 > BUFSIZE - self.buf_used {
            self.flush();
        }
        if line_len > BUFSIZE {
            // Too big for the buffer, send it on its own.
            self.send(&line);
        } else {
            if self.buf_used > 0 {
                self.buffer[self.buf_used] = b'\n';
                self.buf_used += 1;
            }
            self.buffer[self.buf_used..self.buf_used + line_len].copy_from_slice(&line);
            self.buf_used += line_len;
        }
        // poll runs before submit, so a time-based flush already happened.
        Ok(())
    }

    fn poll(&mut self) -> Result<(), Overloaded> {
        self.timed_flush();
        Ok(())
    }
}
