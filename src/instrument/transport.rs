//! Byte-level links to SCPI instruments.
//!
//! - [`TcpTransport`]: raw LXI socket (port 5555 on most bench instruments).
//! - [`SerialTransport`]: RS-232 / USB-CDC line, behind the `instrument_serial` feature.
//!
//! Both append a newline to every command and read one newline-terminated
//! response per query. A query that times out leaves its reply in flight, so
//! the link is resynchronized with `*OPC?` before the next query is sent.

use super::scpi::ScpiTransport;
use crate::error::InstrumentError;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default raw-socket SCPI port.
pub const LXI_SOCKET_PORT: u16 = 5555;

const TERMINATOR: &str = "\n";

/// Marker query answered with `1` once every earlier command has completed.
const SYNC_QUERY: &str = "*OPC?";

/// Read timeouts tolerated while waiting for the sync marker.
const SYNC_ATTEMPTS: usize = 4;

/// Newline-framed command/response link over any byte stream.
struct LineLink<S> {
    name: String,
    reader: BufReader<S>,
    out_of_sync: bool,
}

impl<S: Read + Write> LineLink<S> {
    fn new(name: String, stream: S) -> Self {
        Self {
            name,
            reader: BufReader::new(stream),
            out_of_sync: false,
        }
    }

    fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        let stream = self.reader.get_mut();
        stream.write_all(command.as_bytes())?;
        stream.write_all(TERMINATOR.as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        if self.out_of_sync {
            self.resynchronize()?;
        }
        self.write(command)?;
        let response = read_response(&mut self.reader, command);
        if matches!(response, Err(InstrumentError::Timeout(_))) {
            self.out_of_sync = true;
        }
        let response = response?;
        debug!(instrument = %self.name, command, %response, "query");
        Ok(response)
    }

    /// Discard late replies up to and including the answer to `*OPC?`.
    fn resynchronize(&mut self) -> Result<(), InstrumentError> {
        self.write(SYNC_QUERY)?;
        let mut line = String::new();
        let mut timeouts = 0;
        loop {
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    return Err(InstrumentError::Disconnected(format!(
                        "{} closed during resync",
                        self.name
                    )))
                }
                Ok(_) => {
                    let reply = line.trim();
                    if reply == "1" {
                        self.out_of_sync = false;
                        debug!(instrument = %self.name, "link resynchronized");
                        return Ok(());
                    }
                    warn!(instrument = %self.name, stale = reply, "discarding late reply");
                    line.clear();
                }
                Err(e) if is_timeout(&e) => {
                    timeouts += 1;
                    if timeouts >= SYNC_ATTEMPTS {
                        return Err(InstrumentError::Disconnected(format!(
                            "{} did not answer {SYNC_QUERY} after a timeout",
                            self.name
                        )));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

fn read_response(
    reader: &mut impl BufRead,
    command: &str,
) -> Result<String, InstrumentError> {
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => Err(InstrumentError::Disconnected(format!(
            "connection closed while waiting for '{command}'"
        ))),
        Ok(_) => Ok(line.trim().to_string()),
        Err(e) if is_timeout(&e) => Err(InstrumentError::Timeout(command.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// Append the LXI port unless `address` already names one.
fn with_default_port(address: &str) -> String {
    if address.parse::<SocketAddr>().is_ok() {
        return address.to_string();
    }
    let bare = address.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return SocketAddr::new(ip, LXI_SOCKET_PORT).to_string();
    }
    match address.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => address.to_string(),
        _ => format!("{address}:{LXI_SOCKET_PORT}"),
    }
}

/// SCPI over a raw TCP socket.
pub struct TcpTransport {
    link: LineLink<TcpStream>,
}

impl TcpTransport {
    /// Connect to `address` (`host`, `host:port`, an IP literal or `[v6]:port`;
    /// the port defaults to 5555).
    pub fn connect(address: &str, timeout: Duration) -> Result<Self, InstrumentError> {
        let with_port = with_default_port(address);
        let socket_addr = with_port
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| InstrumentError::Disconnected(format!("cannot resolve '{with_port}'")))?;

        let stream = TcpStream::connect_timeout(&socket_addr, timeout).map_err(|e| {
            InstrumentError::Disconnected(format!("cannot connect to {with_port}: {e}"))
        })?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;

        info!(address = %with_port, "connected to SCPI instrument");
        Ok(Self {
            link: LineLink::new(with_port, stream),
        })
    }
}

impl ScpiTransport for TcpTransport {
    fn name(&self) -> &str {
        &self.link.name
    }

    fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        self.link.write(command)
    }

    fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        self.link.query(command)
    }
}

/// SCPI over a serial port.
#[cfg(feature = "instrument_serial")]
pub struct SerialTransport {
    link: LineLink<Box<dyn serialport::SerialPort>>,
}

#[cfg(feature = "instrument_serial")]
impl SerialTransport {
    /// Open `path` at `baud_rate`, 8N1.
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self, InstrumentError> {
        let port = serialport::new(path, baud_rate).timeout(timeout).open()?;
        info!(port = path, baud_rate, "opened serial SCPI link");
        Ok(Self {
            link: LineLink::new(path.to_string(), port),
        })
    }
}

#[cfg(feature = "instrument_serial")]
impl ScpiTransport for SerialTransport {
    fn name(&self) -> &str {
        &self.link.name
    }

    fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        self.link.write(command)
    }

    fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        self.link.query(command)
    }
}
