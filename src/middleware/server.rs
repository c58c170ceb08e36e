use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Error;

use crate::middleware::Middleware;
use crate::types::TelemetryItem;

/// Receives newline-separated telemetry lines over UDP and feeds them through a middleware
/// chain until SIGINT, SIGTERM or SIGHUP.
pub struct Server<M> {
    socket: UdpSocket,
    middleware: M,
}

impl<M> Server<M>
where
    M: Middleware,
{
    pub fn new(listen: &str, middleware: M) -> Result<Self, Error> {
        let socket = UdpSocket::bind(listen)?;
        // Short enough to notice signals and let middlewares flush while idle.
        socket.set_read_timeout(Some(Duration::from_secs(1)))?;
        Ok(Server { socket, middleware })
    }

    /// Serves until a stop signal arrives, then returns the chain so the caller can `join` it.
    pub fn run(mut self) -> Result<M, Error> {
        let stop = Arc::new(AtomicBool::new(false));

        #[cfg(not(windows))]
        signal_hook::flag::register(signal_hook::consts::SIGHUP, Arc::clone(&stop))?;
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop))?;
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&stop))?;

        self.serve(&stop)?;
        Ok(self.middleware)
    }

    fn serve(&mut self, stop: &AtomicBool) -> Result<(), Error> {
        let mut buf = vec![0; 65535];

        while !stop.load(Ordering::Relaxed) {
            let num_bytes = match self.socket.recv(&mut buf) {
                Err(err) => match err.kind() {
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
                        self.poll();
                        continue;
                    }
                    _ => return Err(Error::from(err)),
                },
                Ok(n) => n,
            };

            for raw in buf[..num_bytes].split(|&x| x == b'\n') {
                if raw.is_empty() {
                    continue;
                }
                let item = match TelemetryItem::parse(raw) {
                    Ok(item) => item,
                    Err(err) => {
                        log::debug!(
                            "dropping malformed line {:?}: {err:#}",
                            String::from_utf8_lossy(raw)
                        );
                        continue;
                    }
                };

                self.poll();
                if let Err(overloaded) = self.middleware.submit(item) {
                    log::debug!("middleware overloaded, dropping {:?}", overloaded.item);
                }
            }
        }
        Ok(())
    }

    fn poll(&mut self) {
        if let Err(overloaded) = self.middleware.poll() {
            log::debug!("middleware overloaded while polling, dropping {:?}", overloaded.item);
        }
    }
}
