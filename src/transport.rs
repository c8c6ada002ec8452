//! Transport seam and the Modbus TCP implementation.
//!
//! The coupler logic never touches sockets. It talks to a [`Transport`],
//! obtained from a [`Connector`], and only exchanges [`Request`]s and raw
//! payload bytes with it. [`TcpConnector`] and [`TcpTransport`] provide the
//! stock Modbus TCP implementation; tests substitute an in-memory device.
//!
//! Every request is tagged with a [`Channel`] naming the logical sub-channel
//! it belongs to. The channel does not change the wire format; it lets the
//! condition mapper tell a failed module-register access apart from a failed
//! process-data access.
//!
//! # Example
//!
//! ```no_run
//! use coupler_io::{Channel, Connector, Request, TcpConnector};
//!
//! let transport = TcpConnector::new().connect("192.168.100.1", 502).unwrap();
//! let data = transport
//!     .execute(
//!         Channel::Parameter,
//!         0,
//!         &Request::ReadHoldingRegisters { address: 0x1040, count: 1 },
//!     )
//!     .unwrap();
//! println!("watchdog threshold bytes: {:02X?}", data);
//! ```

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, trace};

use crate::header::{MbapHeader, MBAP_HEADER_SIZE};
use crate::request::Request;
use crate::response::{self, ExceptionCode};

/// Default Modbus TCP port.
pub const DEFAULT_MODBUS_PORT: u16 = 502;

/// Default socket read/write timeout.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(2);

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Maximum Modbus PDU size.
pub const MAX_PDU_SIZE: usize = 253;

const MAX_STALE_FRAMES: usize = 3;

/// Logical sub-channel a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Channel {
    /// Watchdog status polling.
    Watchdog,
    /// Digital input process data.
    DigitalIn,
    /// Digital output process data.
    DigitalOut,
    /// Analog input process data.
    AnalogIn,
    /// Analog output process data.
    AnalogOut,
    /// Coupler parameter registers.
    Parameter,
    /// Module configuration registers.
    Register,
    /// Direct-mode process data access.
    Value,
    /// I/O boundary check control.
    Boundary,
}

impl Channel {
    /// Numeric channel identifier.
    pub fn id(self) -> u8 {
        match self {
            Channel::Watchdog => 0,
            Channel::DigitalIn => 1,
            Channel::DigitalOut => 2,
            Channel::AnalogIn => 3,
            Channel::AnalogOut => 4,
            Channel::Parameter => 10,
            Channel::Register => 20,
            Channel::Value => 30,
            Channel::Boundary => 40,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Channel::Watchdog => "watchdog",
            Channel::DigitalIn => "digital-in",
            Channel::DigitalOut => "digital-out",
            Channel::AnalogIn => "analog-in",
            Channel::AnalogOut => "analog-out",
            Channel::Parameter => "parameter",
            Channel::Register => "register",
            Channel::Value => "value",
            Channel::Boundary => "boundary",
        };
        f.write_str(name)
    }
}

/// Errors raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No response within the I/O timeout.
    #[error("Transport timeout")]
    Timeout,

    /// The peer closed or reset the connection.
    #[error("Connection lost")]
    ConnectionLost,

    /// The transport was closed or never opened.
    #[error("Not connected")]
    NotConnected,

    /// The server answered with a Modbus exception.
    #[error("Modbus exception: {0}")]
    Exception(ExceptionCode),

    /// The request could not be encoded.
    #[error("Invalid request: {reason}")]
    InvalidRequest {
        /// Description of the problem.
        reason: String,
    },

    /// The response could not be decoded.
    #[error("Invalid response: {reason}")]
    InvalidResponse {
        /// Description of the problem.
        reason: String,
    },

    /// Any other socket error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Creates a new `InvalidRequest` error.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidResponse` error.
    ///
    /// # Example
    ///
    /// ```
    /// use coupler_io::TransportError;
    ///
    /// let err = TransportError::invalid_response("empty PDU");
    /// assert_eq!(err.to_string(), "Invalid response: empty PDU");
    /// ```
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Maps a socket error, folding timeouts and disconnects into their
    /// dedicated variants.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => Self::ConnectionLost,
            _ => Self::Io(err),
        }
    }
}

/// Completion callback for [`Transport::submit`].
pub type Reply = Box<dyn FnOnce(Result<Vec<u8>, TransportError>) + Send + 'static>;

/// Request/response access to a device.
///
/// `execute` returns the response data bytes: the payload of a read, or an
/// empty vector for an acknowledged write.
pub trait Transport: Send + Sync {
    /// Performs one request and blocks for its response.
    fn execute(
        &self,
        channel: Channel,
        unit: u8,
        request: &Request,
    ) -> Result<Vec<u8>, TransportError>;

    /// Performs one request and delivers the result to `reply`.
    ///
    /// The default runs the request inline on the calling thread.
    /// Implementations may deliver later, from another thread.
    fn submit(&self, channel: Channel, unit: u8, request: Request, reply: Reply) {
        reply(self.execute(channel, unit, &request));
    }

    /// Closes the transport. Further requests fail with `NotConnected`.
    fn close(&self);
}

/// Opens transports to an endpoint.
pub trait Connector: Send + Sync {
    /// Connects to `host:port`.
    fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Connector for [`TcpTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TcpConnector {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Socket read/write timeout for each request.
    pub io_timeout: Duration,
}

impl TcpConnector {
    /// Creates a connector with the default timeouts.
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// Sets the TCP connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-request socket timeout.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for TcpConnector {
    fn connect(&self, host: &str, port: u16) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = TcpTransport::connect(host, port, self.connect_timeout, self.io_timeout)?;
        Ok(Arc::new(transport))
    }
}

/// Blocking Modbus TCP transport.
///
/// One socket per transport. Requests are serialized; each carries a fresh
/// transaction ID and responses with a stale ID are discarded.
pub struct TcpTransport {
    stream: Mutex<Option<TcpStream>>,
    peer: SocketAddr,
    transaction_id: AtomicU16,
}

impl TcpTransport {
    /// Connects to `host:port`, trying every resolved address in turn.
    ///
    /// # Errors
    ///
    /// Returns the last connect error if no address accepts the connection.
    pub fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut last_error = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(io_timeout))?;
                    stream.set_write_timeout(Some(io_timeout))?;
                    stream.set_nodelay(true)?;
                    debug!(peer = %addr, "TCP connection established");
                    return Ok(Self {
                        stream: Mutex::new(Some(stream)),
                        peer: addr,
                        transaction_id: AtomicU16::new(1),
                    });
                }
                Err(err) => last_error = Some(err),
            }
        }
        Err(match last_error {
            Some(err) => TransportError::Io(err),
            None => TransportError::invalid_request(format!("{host} resolved to no address")),
        })
    }

    /// Returns the remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn next_transaction_id(&self) -> u16 {
        self.transaction_id.fetch_add(1, Ordering::Relaxed)
    }

    fn exchange(
        stream: &mut TcpStream,
        transaction_id: u16,
        unit: u8,
        pdu: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        let header = MbapHeader::new(transaction_id, pdu.len() as u16, unit);
        let mut frame = Vec::with_capacity(MBAP_HEADER_SIZE + pdu.len());
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(pdu);
        trace!(tx = ?frame, "sending frame");
        stream.write_all(&frame).map_err(TransportError::from_io)?;

        for _ in 0..=MAX_STALE_FRAMES {
            let mut head = [0u8; MBAP_HEADER_SIZE];
            stream.read_exact(&mut head).map_err(TransportError::from_io)?;
            let reply = MbapHeader::from_bytes(&head)?;
            if reply.pdu_len() > MAX_PDU_SIZE {
                return Err(TransportError::invalid_response(format!(
                    "PDU length {} exceeds {}",
                    reply.pdu_len(),
                    MAX_PDU_SIZE
                )));
            }
            let mut body = vec![0u8; reply.pdu_len()];
            stream.read_exact(&mut body).map_err(TransportError::from_io)?;
            trace!(rx = ?body, transaction_id = reply.transaction_id, "received frame");

            if reply.transaction_id != transaction_id {
                debug!(
                    expected = transaction_id,
                    received = reply.transaction_id,
                    "discarding stale response"
                );
                continue;
            }
            if reply.unit_id != unit {
                return Err(TransportError::invalid_response(format!(
                    "unit mismatch: expected {}, got {}",
                    unit, reply.unit_id
                )));
            }
            return Ok(body);
        }

        Err(TransportError::invalid_response(format!(
            "no response with transaction ID {transaction_id}"
        )))
    }
}

impl Transport for TcpTransport {
    fn execute(
        &self,
        channel: Channel,
        unit: u8,
        request: &Request,
    ) -> Result<Vec<u8>, TransportError> {
        let pdu = request.to_pdu()?;
        let mut guard = self.stream.lock();
        let stream = guard.as_mut().ok_or(TransportError::NotConnected)?;
        let transaction_id = self.next_transaction_id();
        trace!(%channel, %request, transaction_id, "executing request");

        match Self::exchange(stream, transaction_id, unit, &pdu) {
            Ok(body) => response::decode(request, &body),
            Err(TransportError::ConnectionLost) => {
                *guard = None;
                Err(TransportError::ConnectionLost)
            }
            Err(err) => Err(err),
        }
    }

    fn close(&self) {
        if let Some(stream) = self.stream.lock().take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            debug!(peer = %self.peer, "TCP connection closed");
        }
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peer", &self.peer)
            .field("open", &self.stream.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    /// Accepts one connection and answers each request with `reply(pdu)`,
    /// echoing the request's transaction and unit IDs.
    fn serve<F>(requests: usize, reply: F) -> (SocketAddr, thread::JoinHandle<Vec<Vec<u8>>>)
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut seen = Vec::new();
            for _ in 0..requests {
                let mut head = [0u8; MBAP_HEADER_SIZE];
                stream.read_exact(&mut head).unwrap();
                let header = MbapHeader::from_bytes(&head).unwrap();
                let mut pdu = vec![0u8; header.pdu_len()];
                stream.read_exact(&mut pdu).unwrap();
                let answer = reply(&pdu);
                let out = MbapHeader::new(header.transaction_id, answer.len() as u16, header.unit_id);
                stream.write_all(&out.to_bytes()).unwrap();
                stream.write_all(&answer).unwrap();
                seen.push(pdu);
            }
            seen
        });
        (addr, handle)
    }

    fn connect(addr: SocketAddr) -> TcpTransport {
        TcpTransport::connect(
            "127.0.0.1",
            addr.port(),
            Duration::from_secs(1),
            Duration::from_millis(500),
        )
        .unwrap()
    }

    #[test]
    fn test_channel_ids() {
        assert_eq!(Channel::Watchdog.id(), 0);
        assert_eq!(Channel::AnalogOut.id(), 4);
        assert_eq!(Channel::Parameter.id(), 10);
        assert_eq!(Channel::Register.id(), 20);
        assert_eq!(Channel::Boundary.id(), 40);
    }

    #[test]
    fn test_from_io_mapping() {
        let timeout = io::Error::new(io::ErrorKind::TimedOut, "t");
        assert!(matches!(TransportError::from_io(timeout), TransportError::Timeout));
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "r");
        assert!(matches!(
            TransportError::from_io(reset),
            TransportError::ConnectionLost
        ));
        let other = io::Error::new(io::ErrorKind::PermissionDenied, "p");
        assert!(matches!(TransportError::from_io(other), TransportError::Io(_)));
    }

    #[test]
    fn test_tcp_read_holding_registers() {
        let (addr, server) = serve(1, |_| vec![0x03, 0x02, 0x00, 0xC2]);
        let transport = connect(addr);
        let data = transport
            .execute(
                Channel::Watchdog,
                0,
                &Request::ReadHoldingRegisters {
                    address: 0x1042,
                    count: 1,
                },
            )
            .unwrap();
        assert_eq!(data, vec![0x00, 0xC2]);
        let seen = server.join().unwrap();
        assert_eq!(seen[0], hex::decode("0310420001").unwrap());
    }

    #[test]
    fn test_tcp_exception_response() {
        let (addr, server) = serve(1, |pdu| vec![pdu[0] | 0x80, 0x02]);
        let transport = connect(addr);
        let result = transport.execute(
            Channel::Register,
            0,
            &Request::ReadInputRegisters { address: 0, count: 4 },
        );
        assert!(matches!(
            result,
            Err(TransportError::Exception(ExceptionCode::IllegalDataAddress))
        ));
        server.join().unwrap();
    }

    #[test]
    fn test_tcp_submit_runs_inline() {
        let (addr, server) = serve(1, |pdu| pdu.to_vec());
        let transport = connect(addr);
        let (tx, rx) = std::sync::mpsc::channel();
        transport.submit(
            Channel::Parameter,
            0,
            Request::WriteSingleRegister {
                address: 0x1182,
                value: 0xC0,
            },
            Box::new(move |result| tx.send(result.is_ok()).unwrap()),
        );
        assert!(rx.try_recv().unwrap());
        server.join().unwrap();
    }

    #[test]
    fn test_tcp_close_then_execute() {
        let (addr, _server) = serve(0, |_| Vec::new());
        let transport = connect(addr);
        transport.close();
        let result = transport.execute(
            Channel::Parameter,
            0,
            &Request::ReadHoldingRegisters { address: 0, count: 1 },
        );
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[test]
    fn test_tcp_connect_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = TcpConnector::new()
            .with_connect_timeout(Duration::from_millis(200))
            .connect("127.0.0.1", port);
        assert!(result.is_err());
    }

    #[test]
    fn test_connector_builders() {
        let connector = TcpConnector::new()
            .with_connect_timeout(Duration::from_millis(100))
            .with_io_timeout(Duration::from_millis(250));
        assert_eq!(connector.connect_timeout, Duration::from_millis(100));
        assert_eq!(connector.io_timeout, Duration::from_millis(250));
        assert_eq!(TcpConnector::default(), TcpConnector::new());
    }
}
