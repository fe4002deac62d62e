//! Remote console client
//!
//! TCP client for the console's line-oriented remote-control service. Memory
//! reads return one hex-encoded line per request; input and write commands
//! are fire-and-forget at the protocol level.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::channel::{Button, ConsoleAddress, SessionChannel, Stick};
use crate::types::TransportError;

/// Client for one console's remote-control service.
pub struct BotbaseClient {
    address: ConsoleAddress,
    op_timeout: Duration,
    conn: Option<Connection>,
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl BotbaseClient {
    pub fn new(address: ConsoleAddress, op_timeout: Duration) -> Self {
        BotbaseClient {
            address,
            op_timeout,
            conn: None,
        }
    }

    fn conn(&mut self) -> Result<&mut Connection, TransportError> {
        self.conn.as_mut().ok_or(TransportError::NotConnected)
    }

    async fn send_line(&mut self, line: String) -> Result<(), TransportError> {
        let timeout = self.op_timeout;
        let conn = self.conn()?;
        let write = async {
            conn.writer.write_all(line.as_bytes()).await?;
            conn.writer.write_all(b"\r\n").await?;
            conn.writer.flush().await
        };
        match tokio::time::timeout(timeout, write).await {
            Ok(result) => result.map_err(TransportError::ConnectionLost),
            Err(_) => Err(TransportError::timeout("send", timeout.as_millis() as u64)),
        }
    }

    async fn read_line(&mut self) -> Result<String, TransportError> {
        let timeout = self.op_timeout;
        let conn = self.conn()?;
        let mut line = String::new();
        match tokio::time::timeout(timeout, conn.reader.read_line(&mut line)).await {
            Ok(Ok(0)) => Err(TransportError::ConnectionLost(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed",
            ))),
            Ok(Ok(_)) => Ok(line.trim_end().to_string()),
            Ok(Err(e)) => Err(TransportError::ConnectionLost(e)),
            Err(_) => Err(TransportError::timeout("recv", timeout.as_millis() as u64)),
        }
    }

    /// Issue a memory read and decode the hex response.
    async fn peek(
        &mut self,
        command: &str,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        self.send_line(format!("{command} 0x{offset:X} {len}")).await?;
        let line = self.read_line().await?;
        let bytes = decode_hex(&line)?;
        if bytes.len() != len {
            return Err(TransportError::Malformed(format!(
                "expected {len} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}

fn decode_hex(line: &str) -> Result<Vec<u8>, TransportError> {
    let line = line.trim();
    if line.len() % 2 != 0 {
        return Err(TransportError::Malformed(format!(
            "odd hex length {}",
            line.len()
        )));
    }
    (0..line.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&line[i..i + 2], 16)
                .map_err(|_| TransportError::Malformed(format!("bad hex at {i}")))
        })
        .collect()
}

fn encode_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02X}")).collect()
}

#[async_trait]
impl SessionChannel for BotbaseClient {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let target = format!("{}:{}", self.address.host, self.address.port);
        debug!(address = %self.address, "connecting to console");
        let stream = tokio::time::timeout(self.op_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| {
                TransportError::timeout("connect", self.op_timeout.as_millis() as u64)
            })?
            .map_err(TransportError::ConnectionLost)?;
        stream.set_nodelay(true).map_err(TransportError::ConnectionLost)?;
        let (read_half, write_half) = stream.into_split();
        self.conn = Some(Connection {
            reader: BufReader::new(read_half),
            writer: write_half,
        });
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.conn = None;
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn label(&self) -> String {
        self.address.to_string()
    }

    async fn read_heap(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, TransportError> {
        self.peek("peek", offset, len).await
    }

    async fn read_main(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, TransportError> {
        self.peek("peekMain", offset, len).await
    }

    async fn write_heap(&mut self, offset: u64, data: &[u8]) -> Result<(), TransportError> {
        self.send_line(format!("poke 0x{offset:X} 0x{}", encode_hex(data)))
            .await
    }

    async fn press(&mut self, button: Button) -> Result<(), TransportError> {
        self.send_line(format!("click {}", button.wire_name())).await
    }

    async fn set_stick(&mut self, stick: Stick, x: i16, y: i16) -> Result<(), TransportError> {
        self.send_line(format!("setStick {} {x} {y}", stick.wire_name()))
            .await
    }

    async fn attach_controller(&mut self) -> Result<(), TransportError> {
        self.send_line("configure controllerType 3".to_string()).await
    }

    async fn detach_controller(&mut self) -> Result<(), TransportError> {
        self.send_line("detachController".to_string()).await
    }

    async fn set_screen(&mut self, on: bool) -> Result<(), TransportError> {
        let command = if on { "screenOn" } else { "screenOff" };
        self.send_line(command.to_string()).await
    }
}
