//! Host TCP port bridged into the simulated Ethernet controller.
//!
//! One connection at a time, like the chip: the request bytes are handed to
//! the simulated socket once it listens, and whatever the scheduler sends is
//! written back before the host connection is dropped.

use node_ethernet::sim::SimulatedW5500;
use node_ethernet::SocketStatus;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;
use tracing::{debug, info, warn};

const READ_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug)]
enum Stage {
    Idle,
    Waiting { stream: TcpStream, request: Vec<u8> },
    InFlight { stream: TcpStream },
}

/// Non-blocking acceptor feeding socket `socket` of a simulated chip.
#[derive(Debug)]
pub struct TcpBridge {
    listener: TcpListener,
    chip: SimulatedW5500,
    socket: u8,
    max_request: usize,
    stage: Stage,
    forwarded: u64,
}

impl TcpBridge {
    /// Bind `addr` and bridge it to `socket` of `chip`.
    pub fn bind(
        addr: SocketAddr,
        chip: SimulatedW5500,
        socket: u8,
        max_request: usize,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        info!(addr = %listener.local_addr()?, "TCP bridge listening");
        Ok(Self {
            listener,
            chip,
            socket,
            max_request,
            stage: Stage::Idle,
            forwarded: 0,
        })
    }

    /// Accept a pending host connection and hand its request to the chip
    /// once the socket listens. Call before each tick.
    pub fn before_tick(&mut self) -> io::Result<()> {
        if matches!(self.stage, Stage::Idle) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "Host connection accepted");
                    let request = self.read_request(&stream)?;
                    self.stage = Stage::Waiting { stream, request };
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }

        if matches!(self.stage, Stage::Waiting { .. })
            && self.chip.status(self.socket) == SocketStatus::Listen
        {
            if let Stage::Waiting { stream, request } =
                std::mem::replace(&mut self.stage, Stage::Idle)
            {
                if self.chip.peer_connect(self.socket, &request) {
                    self.stage = Stage::InFlight { stream };
                } else {
                    self.stage = Stage::Waiting { stream, request };
                }
            }
        }
        Ok(())
    }

    /// Once the scheduler is done with the connection, return its response
    /// to the host. Call after each tick.
    pub fn after_tick(&mut self) {
        let status = self.chip.status(self.socket);
        if !matches!(self.stage, Stage::InFlight { .. })
            || matches!(status, SocketStatus::Established | SocketStatus::CloseWait)
        {
            return;
        }
        if let Stage::InFlight { mut stream } = std::mem::replace(&mut self.stage, Stage::Idle) {
            let response = self.chip.take_sent(self.socket);
            if let Err(e) = stream.write_all(&response).and_then(|()| stream.flush()) {
                warn!(error = %e, "Writing response to host failed");
            }
            self.forwarded += 1;
            debug!(bytes = response.len(), "Response forwarded");
        }
    }

    /// Connections forwarded so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    fn read_request(&self, mut stream: &TcpStream) -> io::Result<Vec<u8>> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut request = Vec::with_capacity(self.max_request);
        let mut buf = [0u8; 256];
        while request.len() < self.max_request && !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => request.extend_from_slice(&buf[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
                Err(e) => return Err(e),
            }
        }
        request.truncate(self.max_request);
        Ok(request)
    }
}
