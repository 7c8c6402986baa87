use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use tracing::{debug, info};

use super::{
    is_timeout, resolve, FrameSource, SourceOptions, StallTracker, Transport, MAX_DATAGRAM_SIZE,
};
use crate::{
    buffering::RawFrame,
    engine::signal::StopSignal,
    error::{Result, ScopeError},
};

/// One datagram in, one frame out. Datagram size is passed through as-is.
///
/// The socket is `connect`ed to the instrument, so datagrams from any other
/// address are filtered by the kernel.
pub struct UdpFrameSource {
    socket: UdpSocket,
    peer: SocketAddr,
    buf: Vec<u8>,
    next_seq: u64,
    stop: StopSignal,
    stall: StallTracker,
}

impl UdpFrameSource {
    pub fn connect(addr: &str, options: SourceOptions, stop: StopSignal) -> Result<Self> {
        let peer = resolve(addr)?[0];
        let connect_err = |source| ScopeError::Connect {
            addr: addr.to_string(),
            source,
        };

        let local: SocketAddr = match peer {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).map_err(connect_err)?;
        socket.connect(peer).map_err(connect_err)?;
        socket.set_read_timeout(Some(options.read_timeout))?;

        // A datagram peer cannot learn our address until we send something.
        if let Some(token) = options.handshake_token.as_deref() {
            socket.send(token.as_bytes()).map_err(connect_err)?;
            debug!(peer = %peer, len = token.len(), "handshake datagram sent");
        }

        info!(peer = %peer, local = %socket.local_addr()?, "udp source ready");
        Ok(Self {
            socket,
            peer,
            buf: vec![0; MAX_DATAGRAM_SIZE],
            next_seq: 0,
            stop,
            stall: StallTracker::new(options.stall_warning),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl FrameSource for UdpFrameSource {
    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        loop {
            if self.stop.is_triggered() {
                return Ok(None);
            }
            match self.socket.recv(&mut self.buf) {
                Ok(n) => {
                    self.stall.data();
                    let frame = RawFrame::new(self.next_seq, self.buf[..n].to_vec());
                    self.next_seq += 1;
                    return Ok(Some(frame));
                }
                Err(e) if is_timeout(&e) => self.stall.idle(self.peer),
                Err(e) => return Err(ScopeError::Io(e)),
            }
        }
    }

    fn transport(&self) -> Transport {
        Transport::Udp
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for UdpFrameSource {
    fn drop(&mut self) {
        debug!(peer = %self.peer, "udp source closed");
    }
}
