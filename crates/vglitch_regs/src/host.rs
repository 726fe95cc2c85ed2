//! Host side of the register link.
//!
//! Writes are fire-and-forget. Since a write always carries the full inbound
//! buffer, fields the caller does not mention must come from somewhere: with
//! delimited framing the session reads the controller's committed values
//! first, with raw framing (no read-back) it uses the last values this
//! session wrote, zero until then.

use crate::error::RegisterError;
use crate::framing::{Framing, READ_REQ, ResponseParser, encode_frame};
use crate::layout::{Direction, RegisterLayout};
use crate::link::open_port;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Runtime;
use tokio_serial::SerialStream;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Register values read back from the controller, in layout order.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReadBack {
    pub out: Vec<(String, u64)>,
    /// Present only when the framing echoes the inbound buffer.
    pub inbound: Option<Vec<(String, u64)>>,
}

impl ReadBack {
    /// Values of one direction as numbers, sign-extended for signed fields.
    pub fn numbers(&self, layout: &RegisterLayout, direction: Direction) -> Vec<(&str, i128)> {
        let fields = match direction {
            Direction::Out => self.out.as_slice(),
            Direction::In => self.inbound.as_deref().unwrap_or_default(),
        };
        fields
            .iter()
            .map(|(name, raw)| {
                let value = layout
                    .field(name)
                    .map_or(i128::from(*raw), |(_, spec)| spec.decode(*raw));
                (name.as_str(), value)
            })
            .collect()
    }
}

/// Parse `name=value`, with the value in decimal, `0x` hex or `0b` binary
/// and an optional leading `-`.
pub fn parse_assignment(s: &str) -> Result<(String, i128), RegisterError> {
    let bad = || RegisterError::BadAssignment(s.to_string());
    let (name, value) = s.split_once('=').ok_or_else(bad)?;
    let value = value.trim().replace('_', "");
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.as_str()),
    };
    let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        u64::from_str_radix(bin, 2)
    } else {
        digits.parse::<u64>()
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(bad());
    }
    let magnitude = i128::from(parsed.map_err(|_| bad())?);
    Ok((name.to_string(), if negative { -magnitude } else { magnitude }))
}

pub struct HostSession<S> {
    stream: S,
    layout: Arc<RegisterLayout>,
    framing: Framing,
    shadow: Vec<u64>,
    read_timeout: Duration,
}

impl<S> HostSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, layout: Arc<RegisterLayout>, framing: Framing) -> Self {
        let shadow = vec![0; layout.field_count(Direction::In)];
        Self {
            stream,
            layout,
            framing,
            shadow,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn layout(&self) -> &RegisterLayout {
        &self.layout
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Validate `updates` and build the bytes for one write, without
    /// touching the session's shadow copy.
    pub fn encode_write(
        &self,
        updates: &[(String, i128)],
    ) -> Result<(Vec<u8>, Vec<u64>), RegisterError> {
        let mut values = self.shadow.clone();
        for (name, value) in updates {
            let (id, spec) = self
                .layout
                .field(name)
                .ok_or_else(|| RegisterError::UnknownField(name.clone()))?;
            if id.direction != Direction::In {
                return Err(RegisterError::WrongDirection {
                    name: name.clone(),
                    expected: Direction::In,
                });
            }
            let raw = spec.encode(*value).ok_or_else(|| RegisterError::OutOfRange {
                name: name.clone(),
                value: *value,
                bits: spec.bits,
                kind: spec.kind,
            })?;
            values[id.slot] = raw;
        }
        let packed = self.layout.pack(Direction::In, &values);
        let bytes = match self.framing {
            Framing::Raw => packed,
            Framing::Delimited => encode_frame(&packed),
        };
        Ok((bytes, values))
    }

    pub async fn write_regs(&mut self, updates: &[(String, i128)]) -> Result<(), RegisterError> {
        let (mut bytes, mut values) = self.encode_write(updates)?;
        if self.framing == Framing::Delimited && self.leaves_fields_out(updates) {
            self.seed_from_device().await?;
            (bytes, values) = self.encode_write(updates)?;
        }
        log::debug!("Sending {} bytes: {:02x?}", bytes.len(), bytes);
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.shadow = values;
        Ok(())
    }

    fn leaves_fields_out(&self, updates: &[(String, i128)]) -> bool {
        self.layout
            .fields_of(Direction::In)
            .any(|f| !updates.iter().any(|(name, _)| *name == f.name))
    }

    /// Replace the shadow copy with the controller's committed inbound
    /// registers.
    async fn seed_from_device(&mut self) -> Result<(), RegisterError> {
        log::debug!("Reading current registers before a partial write");
        let readback = self.read_regs().await?;
        if let Some(inbound) = readback.inbound {
            self.shadow = inbound.into_iter().map(|(_, raw)| raw).collect();
        }
        Ok(())
    }

    pub async fn read_regs(&mut self) -> Result<ReadBack, RegisterError> {
        let timeout = self.read_timeout;
        match tokio::time::timeout(timeout, self.read_inner()).await {
            Ok(result) => result,
            Err(_) => Err(RegisterError::Timeout),
        }
    }

    async fn read_inner(&mut self) -> Result<ReadBack, RegisterError> {
        let out_len = self.layout.bytes(Direction::Out);
        match self.framing {
            Framing::Raw => {
                let mut buf = vec![0u8; out_len];
                self.stream.read_exact(&mut buf).await?;
                Ok(ReadBack {
                    out: self.named(Direction::Out, &buf),
                    inbound: None,
                })
            }
            Framing::Delimited => {
                self.stream.write_all(&[READ_REQ]).await?;
                self.stream.flush().await?;
                let mut parser = ResponseParser::new();
                let payload = loop {
                    let byte = self.stream.read_u8().await?;
                    if let Some(payload) = parser.push(byte) {
                        break payload;
                    }
                };
                let in_len = self.layout.bytes(Direction::In);
                if payload.len() != out_len + in_len {
                    return Err(RegisterError::Protocol(format!(
                        "received {} bytes, but expected {}",
                        payload.len(),
                        out_len + in_len
                    )));
                }
                let (out, inbound) = payload.split_at(out_len);
                Ok(ReadBack {
                    out: self.named(Direction::Out, out),
                    inbound: Some(self.named(Direction::In, inbound)),
                })
            }
        }
    }

    fn named(&self, direction: Direction, buf: &[u8]) -> Vec<(String, u64)> {
        self.layout
            .fields_of(direction)
            .map(|f| f.name.clone())
            .zip(self.layout.unpack(direction, buf))
            .collect()
    }
}

/// Blocking host client over a serial port.
pub struct HostClient {
    rt: Runtime,
    session: HostSession<SerialStream>,
}

impl HostClient {
    pub fn connect(
        port: &str,
        baud_rate: u32,
        layout: Arc<RegisterLayout>,
        framing: Framing,
    ) -> Result<Self, RegisterError> {
        let rt = Runtime::new()?;
        log::info!("Connecting to controller at {port} (baud {baud_rate})");
        let stream = rt.block_on(async { open_port(port, baud_rate) })?;
        Ok(Self {
            rt,
            session: HostSession::new(stream, layout, framing),
        })
    }

    pub fn write_regs(&mut self, updates: &[(String, i128)]) -> Result<(), RegisterError> {
        self.rt.block_on(self.session.write_regs(updates))
    }

    pub fn read_regs(&mut self) -> Result<ReadBack, RegisterError> {
        self.rt.block_on(self.session.read_regs())
    }

    pub fn layout(&self) -> &RegisterLayout {
        self.session.layout()
    }
}
