use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use tracing::{debug, info, warn};

use super::{is_timeout, resolve, FrameSource, SourceOptions, StallTracker, Transport};
use crate::{
    buffering::RawFrame,
    engine::signal::StopSignal,
    error::{Result, ScopeError},
};

/// Cuts a TCP byte stream into frames of exactly `frame_size` bytes.
///
/// Short reads are accumulated until a whole frame is available. A partial
/// frame pending at end of stream or at stop is discarded, never emitted.
pub struct TcpFrameSource {
    stream: TcpStream,
    peer: SocketAddr,
    frame_size: usize,
    buf: Vec<u8>,
    filled: usize,
    next_seq: u64,
    stop: StopSignal,
    stall: StallTracker,
}

impl TcpFrameSource {
    pub fn connect(addr: &str, options: SourceOptions, stop: StopSignal) -> Result<Self> {
        let frame_size = options.frame_size.max(1);
        let mut last_err = None;
        let mut stream = None;
        for candidate in resolve(addr)? {
            match TcpStream::connect_timeout(&candidate, options.connect_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    debug!(addr = %candidate, "connect attempt failed: {e}");
                    last_err = Some(e);
                }
            }
        }
        let mut stream = match stream {
            Some(s) => s,
            None => {
                return Err(ScopeError::Connect {
                    addr: addr.to_string(),
                    source: last_err.unwrap_or_else(|| {
                        std::io::Error::new(std::io::ErrorKind::NotConnected, "no address reachable")
                    }),
                })
            }
        };

        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(options.read_timeout))?;

        if let Some(token) = options.handshake_token.as_deref() {
            send_handshake(&mut stream, token, addr)?;
            debug!(peer = %peer, len = token.len(), "handshake token sent");
        }

        info!(peer = %peer, frame_size, "tcp source connected");
        Ok(Self {
            stream,
            peer,
            frame_size,
            buf: vec![0; frame_size],
            filled: 0,
            next_seq: 0,
            stop,
            stall: StallTracker::new(options.stall_warning),
        })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn take_frame(&mut self) -> RawFrame {
        let bytes = std::mem::replace(&mut self.buf, vec![0; self.frame_size]);
        self.filled = 0;
        let frame = RawFrame::new(self.next_seq, bytes);
        self.next_seq += 1;
        frame
    }
}

/// Write the token the instrument expects before it starts streaming. A
/// failure here is part of connection setup and reported as such.
fn send_handshake<W: Write>(out: &mut W, token: &str, addr: &str) -> Result<()> {
    out.write_all(token.as_bytes())
        .and_then(|()| out.flush())
        .map_err(|source| ScopeError::Connect {
            addr: addr.to_string(),
            source,
        })
}

impl FrameSource for TcpFrameSource {
    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        loop {
            if self.stop.is_triggered() {
                if self.filled > 0 {
                    debug!(bytes = self.filled, "stop requested, dropping partial frame");
                }
                return Ok(None);
            }

            match self.stream.read(&mut self.buf[self.filled..]) {
                Ok(0) => {
                    if self.filled > 0 {
                        warn!(
                            bytes = self.filled,
                            frame_size = self.frame_size,
                            "peer closed mid-frame, partial frame discarded"
                        );
                    }
                    info!(peer = %self.peer, frames = self.next_seq, "peer closed connection");
                    return Ok(None);
                }
                Ok(n) => {
                    self.stall.data();
                    self.filled += n;
                    if self.filled == self.frame_size {
                        return Ok(Some(self.take_frame()));
                    }
                }
                Err(e) if is_timeout(&e) => self.stall.idle(self.peer),
                Err(e) => return Err(ScopeError::Io(e)),
            }
        }
    }

    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for TcpFrameSource {
    fn drop(&mut self) {
        // The stream closes when dropped; shutdown just makes the FIN prompt.
        let _ = self.stream.shutdown(Shutdown::Both);
        debug!(peer = %self.peer, "tcp source closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    fn options(frame_size: usize) -> SourceOptions {
        SourceOptions {
            frame_size,
            read_timeout: Duration::from_millis(20),
            ..SourceOptions::default()
        }
    }

    #[test]
    fn assembles_frames_across_short_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            let data: Vec<u8> = (0u8..16).collect();
            s.write_all(&data[..6]).unwrap();
            thread::sleep(Duration::from_millis(10));
            s.write_all(&data[6..9]).unwrap();
            thread::sleep(Duration::from_millis(10));
            s.write_all(&data[9..]).unwrap();
        });

        let mut src =
            TcpFrameSource::connect(&addr.to_string(), options(8), StopSignal::new()).unwrap();
        let first = src.next_frame().unwrap().unwrap();
        assert_eq!(first.seq(), 0);
        assert_eq!(first.bytes(), &[0, 1, 2, 3, 4, 5, 6, 7]);

        let second = src.next_frame().unwrap().unwrap();
        assert_eq!(second.seq(), 1);
        assert_eq!(second.bytes(), &[8, 9, 10, 11, 12, 13, 14, 15]);

        peer.join().unwrap();
        assert!(src.next_frame().unwrap().is_none());
    }

    #[test]
    fn partial_frame_at_eof_is_discarded() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            s.write_all(&[1, 2, 3, 4, 5, 6]).unwrap();
        });

        let mut src =
            TcpFrameSource::connect(&addr.to_string(), options(4), StopSignal::new()).unwrap();
        assert_eq!(src.next_frame().unwrap().unwrap().bytes(), &[1, 2, 3, 4]);
        peer.join().unwrap();
        assert!(src.next_frame().unwrap().is_none());
    }

    #[test]
    fn handshake_token_is_sent_before_streaming() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            let mut token = [0u8; 5];
            s.read_exact(&mut token).unwrap();
            s.write_all(&[9, 9]).unwrap();
            token
        });

        let opts = SourceOptions {
            handshake_token: Some("START".into()),
            ..options(2)
        };
        let mut src = TcpFrameSource::connect(&addr.to_string(), opts, StopSignal::new()).unwrap();
        assert_eq!(src.next_frame().unwrap().unwrap().bytes(), &[9, 9]);
        assert_eq!(&peer.join().unwrap(), b"START");
    }

    #[test]
    fn stop_signal_ends_idle_read() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = thread::spawn(move || {
            let (s, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(300));
            drop(s);
        });

        let stop = StopSignal::new();
        let mut src = TcpFrameSource::connect(&addr.to_string(), options(4), stop.clone()).unwrap();
        stop.trigger();
        assert!(src.next_frame().unwrap().is_none());
        drop(src);
        peer.join().unwrap();
    }

    #[test]
    fn refused_connection_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TcpFrameSource::connect(&addr.to_string(), options(4), StopSignal::new())
            .err()
            .expect("connect should fail");
        assert!(matches!(err, ScopeError::Connect { .. }), "got {err:?}");
    }

    /// Peer that resets the connection before the token goes out.
    struct ResetWriter;

    impl Write for ResetWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::ConnectionReset.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn handshake_write_failure_is_a_connect_error() {
        let err = send_handshake(&mut ResetWriter, "hello", "10.0.0.9:8080").unwrap_err();
        match err {
            ScopeError::Connect { addr, source } => {
                assert_eq!(addr, "10.0.0.9:8080");
                assert_eq!(source.kind(), std::io::ErrorKind::ConnectionReset);
            }
            other => panic!("expected connect error, got {other:?}"),
        }
    }

    #[test]
    fn handshake_writes_the_token_verbatim() {
        let mut out = Vec::new();
        send_handshake(&mut out, "start", "127.0.0.1:1").unwrap();
        assert_eq!(out, b"start");
    }
}
