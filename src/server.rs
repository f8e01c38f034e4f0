//! Single-threaded, readiness-based event loop.
//!
//! One `mio::Poll` pollset holds the listening socket plus every connected
//! socket. Each iteration updates interests, blocks in the poll with a
//! 1-second timeout, runs periodic maintenance, accept-drains the listener,
//! then read-drains and write-drains every ready connection under a shared
//! per-iteration write budget.
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BytesMut};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, error, info};

use crate::cmd;
use crate::db::Store;
use crate::resp::{serialize, try_parse, ParseOutcome, RespValue};

const LISTENER_TOKEN: Token = Token(0);
const READ_CHUNK: usize = 4 * 1024;
const OUTBOUND_CAP: usize = 2 * 1024 * 1024;
const WRITE_BUDGET_PER_ITERATION: usize = 64 * 1024;
const SWEEP_INTERVAL_MS: i64 = 5_000;
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

/// Per-client state: socket handle, inbound/outbound byte buffers. Owned
/// directly by the event loop's connection table, never shared.
///
/// Generic over the stream type so the read/write-drain logic can be
/// exercised in tests against an in-memory mock instead of a real socket;
/// the running server only ever instantiates `Connection<TcpStream>`.
struct Connection<S> {
    stream: S,
    inbound: BytesMut,
    outbound: BytesMut,
    read_armed: bool,
    write_armed: bool,
}

enum DrainOutcome {
    Continue,
    Destroy,
}

impl<S> Connection<S> {
    fn new(stream: S) -> Self {
        Self {
            stream,
            inbound: BytesMut::with_capacity(READ_CHUNK),
            outbound: BytesMut::new(),
            read_armed: true,
            write_armed: false,
        }
    }

    fn wants_read(&self) -> bool {
        self.outbound.len() < OUTBOUND_CAP
    }

    fn wants_write(&self) -> bool {
        !self.outbound.is_empty()
    }

    fn interest(&self) -> Interest {
        if self.wants_write() {
            if self.wants_read() {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::WRITABLE
            }
        } else {
            Interest::READABLE
        }
    }

    /// Parse and dispatch as many complete frames as the inbound buffer
    /// currently holds. A protocol error erases at least one byte so the
    /// connection always makes forward progress instead of spinning.
    fn process_inbound(&mut self, store: &mut Store, now_ms: i64) -> crate::Result<()> {
        loop {
            match try_parse(&self.inbound) {
                ParseOutcome::Complete { consumed, value } => {
                    let response = cmd::execute(value, store, now_ms, false)?;
                    self.inbound.advance(consumed);
                    self.outbound.extend_from_slice(&serialize(&response));
                }
                ParseOutcome::Incomplete => return Ok(()),
                ParseOutcome::ProtocolError(msg) => {
                    let response = RespValue::error(format!("ERR Protocol error: {msg}"));
                    self.outbound.extend_from_slice(&serialize(&response));
                    if self.inbound.is_empty() {
                        return Ok(());
                    }
                    self.inbound.advance(1);
                }
            }
        }
    }
}

impl<S: Read> Connection<S> {
    /// Read up to `EAGAIN`, parsing and dispatching as many complete frames
    /// as arrive. Returns `Err` only for a fatal AOF write failure, which
    /// must terminate the process rather than just this connection.
    fn read_drain(&mut self, store: &mut Store, now_ms: i64) -> crate::Result<DrainOutcome> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(DrainOutcome::Destroy),
                Ok(n) => {
                    self.inbound.extend_from_slice(&chunk[..n]);
                    self.process_inbound(store, now_ms)?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(DrainOutcome::Continue),
                Err(e) => {
                    debug!(error = %e, "connection read error");
                    return Ok(DrainOutcome::Destroy);
                }
            }
        }
    }
}

impl<S: Write> Connection<S> {
    /// Write at most `*budget` outbound bytes; deducts what was actually
    /// written. `EAGAIN` is benign and just ends this connection's turn.
    fn write_drain(&mut self, budget: &mut usize) -> DrainOutcome {
        while !self.outbound.is_empty() && *budget > 0 {
            let n = self.outbound.len().min(*budget);
            match self.stream.write(&self.outbound[..n]) {
                Ok(0) => return DrainOutcome::Destroy,
                Ok(written) => {
                    self.outbound.advance(written);
                    *budget -= written;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!(error = %e, "connection write error");
                    return DrainOutcome::Destroy;
                }
            }
        }
        DrainOutcome::Continue
    }
}

/// Owns the listening socket, the connection table, and the keyspace store.
pub struct Server {
    listener: TcpListener,
    poll: Poll,
    events: Events,
    connections: HashMap<Token, Connection<TcpStream>>,
    next_token: usize,
    store: Store,
    last_sweep_ms: i64,
}

/// Bind a non-blocking listener on all interfaces with a 128-entry backlog.
pub fn bind(port: u16) -> io::Result<TcpListener> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let socket = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::STREAM, Some(socket2::Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}

impl Server {
    pub fn new(listener: TcpListener, store: Store) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listener = listener;
        poll.registry().register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        Ok(Self {
            listener,
            poll,
            events: Events::with_capacity(1024),
            connections: HashMap::new(),
            next_token: 1,
            store,
            last_sweep_ms: now_ms(),
        })
    }

    /// Run until a fatal error occurs (AOF write failure, or an
    /// unrecoverable poll error); ordinary per-connection I/O failures are
    /// absorbed and only destroy that one connection.
    pub fn run(&mut self) -> crate::Result<()> {
        info!("accepting inbound connections");
        loop {
            self.update_interests()?;
            self.poll.poll(&mut self.events, Some(POLL_TIMEOUT))?;

            self.maybe_sweep();

            let ready: Vec<(Token, bool)> = self.events.iter().map(|e| (e.token(), e.is_readable())).collect();

            let mut write_budget = WRITE_BUDGET_PER_ITERATION;
            for (token, readable) in ready {
                if token == LISTENER_TOKEN {
                    if readable {
                        self.accept_drain()?;
                    }
                    continue;
                }
                self.service_connection(token, readable, &mut write_budget)?;
            }
        }
    }

    fn service_connection(&mut self, token: Token, readable: bool, write_budget: &mut usize) -> crate::Result<()> {
        let mut destroy = false;

        if readable {
            let Some(conn) = self.connections.get_mut(&token) else { return Ok(()) };
            match conn.read_drain(&mut self.store, now_ms())? {
                DrainOutcome::Destroy => destroy = true,
                DrainOutcome::Continue => {}
            }
        }

        if !destroy {
            if let Some(conn) = self.connections.get_mut(&token) {
                if let DrainOutcome::Destroy = conn.write_drain(write_budget) {
                    destroy = true;
                }
            }
        }

        if destroy {
            if let Some(mut conn) = self.connections.remove(&token) {
                let _ = self.poll.registry().deregister(&mut conn.stream);
                debug!(?token, "connection closed");
            }
        }

        Ok(())
    }

    /// Accept until `EAGAIN`, enrolling each new socket with a fresh
    /// connection record.
    fn accept_drain(&mut self) -> crate::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    self.poll.registry().register(&mut stream, token, Interest::READABLE)?;
                    self.connections.insert(token, Connection::new(stream));
                    debug!(%addr, ?token, "accepted connection");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return Ok(());
                }
            }
        }
    }

    /// A connection always wants read-readiness unless backpressured by its
    /// own outbound cap, and wants write-readiness iff it has queued bytes.
    fn update_interests(&mut self) -> crate::Result<()> {
        let registry = self.poll.registry().try_clone()?;
        for (token, conn) in self.connections.iter_mut() {
            let wanted = conn.interest();
            let currently_write_armed = conn.write_armed;
            let now_write_armed = conn.wants_write();
            if currently_write_armed != now_write_armed || conn.read_armed != conn.wants_read() {
                registry.reregister(&mut conn.stream, *token, wanted)?;
                conn.write_armed = now_write_armed;
                conn.read_armed = conn.wants_read();
            }
        }
        Ok(())
    }

    fn maybe_sweep(&mut self) {
        let now = now_ms();
        if now - self.last_sweep_ms >= SWEEP_INTERVAL_MS {
            self.store.sweep(now);
            self.last_sweep_ms = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::aof::AofState;

    /// A `Read + Write` stand-in for a socket, so `Connection`'s drain logic
    /// can be exercised without a real TCP pair. Reads return queued bytes
    /// until exhausted, then `WouldBlock` (or `Ok(0)` if `eof` is set);
    /// writes accept at most `write_cap` bytes per call and record everything
    /// actually "sent".
    #[derive(Default)]
    struct MockStream {
        to_read: VecDeque<u8>,
        eof: bool,
        written: Vec<u8>,
        write_cap: Option<usize>,
        write_would_block: bool,
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.to_read.is_empty() {
                if self.eof {
                    return Ok(0);
                }
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "no data queued"));
            }
            let n = buf.len().min(self.to_read.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.to_read.pop_front().expect("checked non-empty");
            }
            Ok(n)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.write_would_block {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "socket buffer full"));
            }
            let n = match self.write_cap {
                Some(cap) => buf.len().min(cap),
                None => buf.len(),
            };
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn mock_conn() -> Connection<MockStream> {
        Connection::new(MockStream::default())
    }

    fn store() -> Store {
        Store::new(1 << 20, AofState::disabled())
    }

    #[test]
    fn read_drain_dispatches_pipelined_frames_in_order() {
        let mut conn = mock_conn();
        conn.stream.to_read = b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n".iter().copied().collect();
        let mut s = store();

        let outcome = conn.read_drain(&mut s, 0).unwrap();
        assert!(matches!(outcome, DrainOutcome::Continue));
        assert_eq!(&conn.outbound[..], b"+PONG\r\n$2\r\nhi\r\n".as_slice());
    }

    #[test]
    fn read_drain_destroys_connection_on_eof() {
        let mut conn = mock_conn();
        conn.stream.eof = true;
        let mut s = store();

        let outcome = conn.read_drain(&mut s, 0).unwrap();
        assert!(matches!(outcome, DrainOutcome::Destroy));
    }

    #[test]
    fn protocol_error_erases_at_least_one_byte_and_keeps_going() {
        let mut conn = mock_conn();
        conn.stream.to_read = b"garbage\r\n*1\r\n$4\r\nPING\r\n".iter().copied().collect();
        let mut s = store();

        conn.read_drain(&mut s, 0).unwrap();
        // the leading garbage produced an error reply, forward progress was
        // made past it, and the well-formed PING behind it still executed.
        assert!(conn.outbound.ends_with(b"+PONG\r\n"));
        assert!(conn.inbound.is_empty());
    }

    #[test]
    fn outbound_at_cap_stops_wanting_read() {
        let mut conn = mock_conn();
        assert!(conn.wants_read());
        conn.outbound.extend_from_slice(&vec![0u8; OUTBOUND_CAP]);
        assert!(!conn.wants_read());
        assert!(!conn.interest().is_readable());
        assert!(conn.interest().is_writable());
    }

    #[test]
    fn write_drain_never_exceeds_its_budget() {
        let mut conn = mock_conn();
        conn.outbound.extend_from_slice(&vec![b'x'; 100_000]);
        let mut budget = WRITE_BUDGET_PER_ITERATION;

        let outcome = conn.write_drain(&mut budget);

        assert!(matches!(outcome, DrainOutcome::Continue));
        assert_eq!(conn.stream.written.len(), WRITE_BUDGET_PER_ITERATION);
        assert_eq!(budget, 0);
        assert_eq!(conn.outbound.len(), 100_000 - WRITE_BUDGET_PER_ITERATION);
    }

    #[test]
    fn write_drain_stops_once_budget_shared_with_other_connections_is_spent() {
        let mut a = mock_conn();
        let mut b = mock_conn();
        a.outbound.extend_from_slice(&vec![b'a'; 40_000]);
        b.outbound.extend_from_slice(&vec![b'b'; 40_000]);
        let mut budget = WRITE_BUDGET_PER_ITERATION;

        a.write_drain(&mut budget);
        b.write_drain(&mut budget);

        assert_eq!(a.stream.written.len() + b.stream.written.len(), WRITE_BUDGET_PER_ITERATION);
        assert_eq!(budget, 0);
    }

    #[test]
    fn write_drain_benignly_stops_on_would_block() {
        let mut conn = mock_conn();
        conn.stream.write_would_block = true;
        conn.outbound.extend_from_slice(b"hello");
        let mut budget = WRITE_BUDGET_PER_ITERATION;

        let outcome = conn.write_drain(&mut budget);

        assert!(matches!(outcome, DrainOutcome::Continue));
        assert_eq!(conn.stream.written.len(), 0);
        assert_eq!(&conn.outbound[..], b"hello".as_slice());
    }

    #[test]
    fn write_drain_destroys_connection_on_zero_byte_write() {
        let mut conn = mock_conn();
        conn.stream.write_cap = Some(0);
        conn.outbound.extend_from_slice(b"hello");
        let mut budget = WRITE_BUDGET_PER_ITERATION;

        let outcome = conn.write_drain(&mut budget);

        assert!(matches!(outcome, DrainOutcome::Destroy));
    }
}
