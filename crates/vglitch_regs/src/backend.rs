use crate::diag::LinkDiagnostics;
use crate::error::{LayoutError, RegisterError};
use crate::file::{RegisterFile, RegisterValues};
use crate::framing::{FrameDecoder, Framing, Step, encode_frame};
use crate::layout::Direction;
use std::sync::Arc;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Fixed-at-startup link parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendConfig {
    pub baud_rate: u32,
    pub in_width_bytes: usize,
    pub out_width_bytes: usize,
    pub framing: Framing,
}

impl BackendConfig {
    pub fn new(baud_rate: u32, in_width_bytes: usize, out_width_bytes: usize) -> Self {
        Self {
            baud_rate,
            in_width_bytes,
            out_width_bytes,
            framing: Framing::Raw,
        }
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }
}

/// What a single [`RegisterBackend::feed`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEvent {
    None,
    Committed,
    /// The host wants a read response, see [`RegisterBackend::read_response`].
    ReadRequested,
    Dropped,
}

/// Turns the inbound byte stream into committed register snapshots and
/// serializes the outbound registers.
pub struct RegisterBackend {
    config: BackendConfig,
    file: Arc<RegisterFile>,
    decoder: FrameDecoder,
    diag: Arc<LinkDiagnostics>,
    /// Inbound snapshot retired by the previous commit.
    spare: Option<Arc<RegisterValues>>,
}

impl RegisterBackend {
    /// Bind the link parameters to a register file. The configured widths
    /// must match what the layout's fields add up to.
    pub fn configure(config: BackendConfig, file: Arc<RegisterFile>) -> Result<Self, LayoutError> {
        if config.baud_rate == 0 {
            return Err(LayoutError::ZeroBaudRate);
        }
        let layout = file.layout();
        for (direction, configured) in [
            (Direction::In, config.in_width_bytes),
            (Direction::Out, config.out_width_bytes),
        ] {
            let required = layout.bytes(direction);
            if configured != required {
                return Err(LayoutError::WidthMismatch {
                    direction,
                    configured,
                    required,
                });
            }
        }
        log::info!(
            "Register backend: {} baud, {:?} framing, {} in bytes, {} out bytes",
            config.baud_rate,
            config.framing,
            config.in_width_bytes,
            config.out_width_bytes
        );
        Ok(Self {
            decoder: FrameDecoder::new(config.framing, config.in_width_bytes),
            config,
            file,
            diag: Arc::new(LinkDiagnostics::new()),
            spare: None,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn file(&self) -> &Arc<RegisterFile> {
        &self.file
    }

    pub fn diagnostics(&self) -> Arc<LinkDiagnostics> {
        Arc::clone(&self.diag)
    }

    /// Bytes of the frame currently being assembled.
    pub fn pending_bytes(&self) -> usize {
        self.decoder.pending()
    }

    /// Accept one byte from the transport. Never blocks; a complete frame is
    /// committed to the register file in one swap.
    pub fn feed(&mut self, byte: u8) -> FeedEvent {
        self.diag.byte_received();
        match self.decoder.push(byte) {
            Step::Pending => FeedEvent::None,
            Step::Complete => {
                self.commit();
                FeedEvent::Committed
            }
            Step::ReadRequest { aborted_frame } => {
                if aborted_frame {
                    log::debug!("Read request interrupted a partial write frame");
                    self.diag.frame_dropped();
                }
                self.diag.read_request();
                FeedEvent::ReadRequested
            }
            Step::Dropped => {
                log::debug!("Dropped malformed write frame");
                self.diag.frame_dropped();
                FeedEvent::Dropped
            }
            Step::Resync => {
                log::debug!("Start marker inside frame, resynchronizing");
                self.diag.resync();
                FeedEvent::None
            }
            Step::Discarded => {
                self.diag.byte_discarded();
                FeedEvent::None
            }
        }
    }

    /// Decode the frame into the snapshot retired two commits ago and swap
    /// it in. Only allocates while the tick loop still holds that snapshot.
    fn commit(&mut self) {
        let layout = self.file.layout();
        let mut next = self
            .spare
            .take()
            .unwrap_or_else(|| Arc::new(RegisterValues::zeroed(layout, Direction::In)));
        match Arc::make_mut(&mut next).fill_from_bytes(layout, self.decoder.frame()) {
            Ok(()) => {
                self.spare = Some(self.file.swap_inbound(next));
                self.diag.frame_committed();
                log::debug!("Committed register frame {:02x?}", self.decoder.frame());
            }
            // widths were checked in `configure`
            Err(e) => {
                log::warn!("Discarding frame: {e}");
                self.spare = Some(next);
            }
        }
    }

    /// Packed outbound registers, MSB-first field order.
    pub fn poll_out(&self) -> Vec<u8> {
        self.file.outbound().to_bytes(self.file.layout())
    }

    /// Delimited answer to a read request: outbound buffer followed by the
    /// committed inbound buffer.
    pub fn read_response(&self) -> Vec<u8> {
        let layout = self.file.layout();
        let mut payload = self.poll_out();
        payload.extend(self.file.inbound().to_bytes(layout));
        encode_frame(&payload)
    }

    /// Bytes to send back for a feed event, if any.
    pub fn response_for(&self, event: FeedEvent) -> Option<Vec<u8>> {
        match (event, self.config.framing) {
            (FeedEvent::ReadRequested, Framing::Delimited) => Some(self.read_response()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for RegisterBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterBackend")
            .field("config", &self.config)
            .field("pending", &self.decoder.pending())
            .finish()
    }
}

/// Build a backend whose widths are taken from the layout itself.
pub fn backend_for(
    file: Arc<RegisterFile>,
    baud_rate: u32,
    framing: Framing,
) -> Result<RegisterBackend, RegisterError> {
    let layout = file.layout();
    let config = BackendConfig::new(
        baud_rate,
        layout.bytes(Direction::In),
        layout.bytes(Direction::Out),
    )
    .with_framing(framing);
    Ok(RegisterBackend::configure(config, file)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{END_WRITE, READ_REQ, START_WRITE, decode_frame};
    use crate::layout::RegisterLayout;

    fn four_byte_file() -> Arc<RegisterFile> {
        let layout = RegisterLayout::parse(&["glitch_delay=32", "status=8:out"]).unwrap();
        Arc::new(RegisterFile::new(Arc::new(layout)))
    }

    fn raw_backend() -> RegisterBackend {
        RegisterBackend::configure(BackendConfig::new(DEFAULT_BAUD_RATE, 4, 1), four_byte_file())
            .unwrap()
    }

    #[test]
    fn rejects_mismatched_widths() {
        let err = RegisterBackend::configure(BackendConfig::new(115_200, 5, 1), four_byte_file())
            .unwrap_err();
        assert_eq!(
            err,
            LayoutError::WidthMismatch {
                direction: Direction::In,
                configured: 5,
                required: 4,
            }
        );
        let err = RegisterBackend::configure(BackendConfig::new(0, 4, 1), four_byte_file())
            .unwrap_err();
        assert_eq!(err, LayoutError::ZeroBaudRate);
    }

    #[test]
    fn commits_after_width_bytes() {
        let mut backend = raw_backend();
        let file = Arc::clone(backend.file());
        assert_eq!(backend.feed(0x00), FeedEvent::None);
        assert_eq!(backend.feed(0x00), FeedEvent::None);
        assert_eq!(backend.feed(0x01), FeedEvent::None);
        assert_eq!(file.inbound().as_slice(), &[0]);
        assert_eq!(backend.feed(0x00), FeedEvent::Committed);
        assert_eq!(file.inbound().as_slice(), &[0x100]);
        assert_eq!(backend.pending_bytes(), 0);
    }

    #[test]
    fn commits_reuse_retired_snapshots() {
        let mut backend = raw_backend();
        let file = Arc::clone(backend.file());
        for b in [0, 0, 0, 1] {
            backend.feed(b);
        }
        let first = Arc::as_ptr(&file.inbound());
        for b in [0, 0, 0, 2, 0, 0, 0, 3] {
            backend.feed(b);
        }
        assert_eq!(Arc::as_ptr(&file.inbound()), first);
        assert_eq!(file.inbound().as_slice(), &[3]);
    }

    #[test]
    fn held_snapshot_is_never_overwritten() {
        let mut backend = raw_backend();
        let file = Arc::clone(backend.file());
        for b in [0, 0, 0, 1] {
            backend.feed(b);
        }
        let held = file.inbound();
        for b in [0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 4] {
            backend.feed(b);
        }
        assert_eq!(held.as_slice(), &[1]);
        assert_eq!(file.inbound().as_slice(), &[4]);
        assert_eq!(backend.diagnostics().snapshot().frames_committed, 4);
    }

    #[test]
    fn partial_write_leaves_committed_file_alone() {
        let mut backend = raw_backend();
        for b in [0, 0, 0, 5] {
            backend.feed(b);
        }
        let file = Arc::clone(backend.file());
        let before = file.inbound_version();
        for b in [0xFF, 0xFF, 0xFF] {
            backend.feed(b);
        }
        assert_eq!(file.inbound().as_slice(), &[5]);
        assert_eq!(file.inbound_version(), before);
        assert_eq!(backend.pending_bytes(), 3);
    }

    #[test]
    fn dropped_byte_misaligns_following_frames() {
        let mut backend = raw_backend();
        let file = Arc::clone(backend.file());
        // first frame loses its leading byte in transit
        for b in [0x00, 0x00, 0x07] {
            backend.feed(b);
        }
        for b in [0x00, 0x00, 0x00, 0x09] {
            backend.feed(b);
        }
        // three bytes of the broken frame plus one of the next
        assert_eq!(file.inbound().as_slice(), &[0x0000_0700]);
        assert_eq!(backend.pending_bytes(), 3);
        assert_eq!(backend.diagnostics().snapshot().frames_dropped, 0);
    }

    #[test]
    fn poll_out_packs_published_status() {
        let backend = raw_backend();
        let file = backend.file();
        let (id, _) = file.layout().field("status").unwrap();
        let mut out = RegisterValues::zeroed(file.layout(), Direction::Out);
        out.set(id, 0xC3);
        file.publish_outbound(out);
        assert_eq!(backend.poll_out(), vec![0xC3]);
    }

    #[test]
    fn delimited_read_request_answers_out_then_in() {
        let file = four_byte_file();
        let mut backend = backend_for(file, DEFAULT_BAUD_RATE, Framing::Delimited).unwrap();
        for b in [START_WRITE, 0x00, 0x00, 0x00, 0x2A, END_WRITE] {
            backend.feed(b);
        }
        let event = backend.feed(READ_REQ);
        assert_eq!(event, FeedEvent::ReadRequested);
        let response = backend.response_for(event).unwrap();
        assert_eq!(decode_frame(&response).unwrap(), vec![0x00, 0x00, 0x00, 0x00, 0x2A]);
    }

    #[test]
    fn diagnostics_count_drops_and_resyncs() {
        let file = four_byte_file();
        let mut backend = backend_for(file, DEFAULT_BAUD_RATE, Framing::Delimited).unwrap();
        for b in [0x55, START_WRITE, 0x01, START_WRITE, 0x01, END_WRITE] {
            backend.feed(b);
        }
        let diag = backend.diagnostics().snapshot();
        assert_eq!(diag.bytes_received, 6);
        assert_eq!(diag.bytes_discarded, 1);
        assert_eq!(diag.resyncs, 1);
        assert_eq!(diag.frames_dropped, 1);
        assert_eq!(diag.frames_committed, 0);
    }
}
