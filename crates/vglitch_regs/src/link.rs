//! Serial transport for the register backend.
//!
//! The decode side runs on its own tokio runtime, unsynchronized with the
//! controller's tick loop; the only thing the two share is the register
//! file's snapshot cells.

use crate::backend::{FeedEvent, RegisterBackend};
use crate::error::RegisterError;
use crate::framing::Framing;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

const READ_CHUNK: usize = 64;

/// Open a serial port with the 8N1 settings both ends agree on. Must be
/// called from inside a tokio runtime.
pub fn open_port(port: &str, baud_rate: u32) -> Result<SerialStream, RegisterError> {
    tokio_serial::new(port, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
        .map_err(|e| RegisterError::Serial(format!("{port}: {e}")))
}

/// Pump bytes from `stream` into `backend` until EOF, an I/O error, or
/// `stop` flips to `true`.
///
/// Delimited read requests are answered immediately. In raw mode, when
/// `push_interval` is set, the packed outbound registers are written on that
/// period since the host has no way to ask for them.
pub async fn serve<S>(
    mut stream: S,
    mut backend: RegisterBackend,
    push_interval: Option<Duration>,
    mut stop: watch::Receiver<bool>,
) -> Result<RegisterBackend, RegisterError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let raw_push = match backend.config().framing {
        Framing::Raw => push_interval,
        Framing::Delimited => None,
    };
    let mut ticker = raw_push.map(tokio::time::interval);
    let mut buf = [0u8; READ_CHUNK];

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    log::info!("Register link stopping");
                    return Ok(backend);
                }
            }
            read = stream.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    log::info!("Register link closed by peer");
                    return Ok(backend);
                }
                for &byte in &buf[..n] {
                    let event = backend.feed(byte);
                    if event == FeedEvent::ReadRequested {
                        if let Some(response) = backend.response_for(event) {
                            stream.write_all(&response).await?;
                            stream.flush().await?;
                        }
                    }
                }
            }
            _ = async {
                match ticker.as_mut() {
                    Some(t) => { t.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                stream.write_all(&backend.poll_out()).await?;
                stream.flush().await?;
            }
        }
    }
}

/// Blocking handle on a register backend served over a serial port.
pub struct SerialLink {
    rt: Runtime,
    stop: watch::Sender<bool>,
    task: JoinHandle<Result<RegisterBackend, RegisterError>>,
}

impl SerialLink {
    pub fn open(
        port: &str,
        backend: RegisterBackend,
        push_interval: Option<Duration>,
    ) -> Result<Self, RegisterError> {
        let rt = Runtime::new()?;
        let baud_rate = backend.config().baud_rate;
        log::info!("Opening register link on {port} at {baud_rate} baud");
        let stream = rt.block_on(async { open_port(port, baud_rate) })?;
        Ok(Self::spawn(rt, stream, backend, push_interval))
    }

    /// Serve `backend` over an already-open stream on `rt`.
    pub fn spawn<S>(
        rt: Runtime,
        stream: S,
        backend: RegisterBackend,
        push_interval: Option<Duration>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (stop, stop_rx) = watch::channel(false);
        let task = rt.spawn(serve(stream, backend, push_interval, stop_rx));
        Self { rt, stop, task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the link and hand the backend back.
    pub fn shutdown(self) -> Result<RegisterBackend, RegisterError> {
        let _ = self.stop.send(true);
        let joined = self.rt.block_on(self.task);
        match joined {
            Ok(result) => result,
            Err(e) => Err(RegisterError::Protocol(format!("link task failed: {e}"))),
        }
    }
}
