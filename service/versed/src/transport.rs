//! `mio::net::TcpStream` wrapped as a `verse_core::stream::Transport` (§1 Non-goals: socket
//! plumbing is out of the core's scope; this is the boundary implementation).
use std::io::{self, Read, Write};
use verse_core::stream::Transport;

pub struct TcpTransport {
    stream: mio::net::TcpStream,
    outstanding: usize,
}

impl TcpTransport {
    pub fn new(stream: mio::net::TcpStream) -> TcpTransport {
        TcpTransport { stream, outstanding: 0 }
    }
}

impl Transport for TcpTransport {
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn try_send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stream.write(buf) {
            Ok(n) => {
                self.outstanding += buf.len() - n;
                Ok(n)
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.outstanding += buf.len();
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn outstanding_write_bytes(&self) -> usize {
        self.outstanding
    }

    fn send_buffer_size(&self) -> usize {
        // mio 0.6 does not expose SO_SNDBUF; a fixed budget mirrors the default outbound queue
        // byte budget rather than querying the OS.
        65536
    }
}
