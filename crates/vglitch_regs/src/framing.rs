//! Byte-stream framing.
//!
//! `Raw` is the base protocol: a frame is exactly `width` bytes and byte
//! count is the only synchronization. A dropped or duplicated byte shifts
//! every later frame until the count happens to realign.
//!
//! `Delimited` wraps each frame in `START_WRITE .. END_WRITE` and escapes
//! control bytes in the payload with `ESCAPE`, which lets the decoder throw
//! away a corrupt frame and pick up again at the next start byte.

use crate::error::RegisterError;
use serde::{Deserialize, Serialize};

pub const READ_REQ: u8 = 0x0A;
pub const START_WRITE: u8 = 0x0B;
pub const END_WRITE: u8 = 0x0C;
pub const ESCAPE: u8 = 0x0D;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    #[default]
    Raw,
    Delimited,
}

pub fn is_control(byte: u8) -> bool {
    matches!(byte, READ_REQ | START_WRITE | END_WRITE | ESCAPE)
}

/// Wrap `payload` in start/end markers, escaping control bytes.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() * 2 + 2);
    out.push(START_WRITE);
    for &b in payload {
        if is_control(b) {
            out.push(ESCAPE);
        }
        out.push(b);
    }
    out.push(END_WRITE);
    out
}

/// Outcome of pushing one byte into a [`FrameDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Byte absorbed, frame still incomplete.
    Pending,
    /// A full frame is available through [`FrameDecoder::frame`].
    Complete,
    /// Host asked for a register read. `aborted_frame` is set when this
    /// interrupted a partial write.
    ReadRequest { aborted_frame: bool },
    /// Frame closed with the wrong length or overflowed; discarded.
    Dropped,
    /// A start byte arrived inside a frame; the partial frame was discarded.
    Resync,
    /// Byte arrived outside any frame and carries no meaning.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Payload { escaped: bool },
}

/// Assembles frames of a fixed payload width into a preallocated buffer.
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    buf: Box<[u8]>,
    pos: usize,
    state: State,
}

impl FrameDecoder {
    pub fn new(framing: Framing, width: usize) -> Self {
        Self {
            framing,
            buf: vec![0u8; width].into_boxed_slice(),
            pos: 0,
            state: State::Idle,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Bytes of the frame in progress.
    pub fn pending(&self) -> usize {
        self.pos
    }

    /// The last completed frame. Only meaningful right after
    /// [`Step::Complete`].
    pub fn frame(&self) -> &[u8] {
        &self.buf
    }

    pub fn push(&mut self, byte: u8) -> Step {
        match self.framing {
            Framing::Raw => self.push_raw(byte),
            Framing::Delimited => self.push_delimited(byte),
        }
    }

    fn push_raw(&mut self, byte: u8) -> Step {
        if self.buf.is_empty() {
            return Step::Discarded;
        }
        self.buf[self.pos] = byte;
        self.pos += 1;
        if self.pos == self.buf.len() {
            self.pos = 0;
            Step::Complete
        } else {
            Step::Pending
        }
    }

    fn push_delimited(&mut self, byte: u8) -> Step {
        match self.state {
            State::Idle => match byte {
                START_WRITE => {
                    self.pos = 0;
                    self.state = State::Payload { escaped: false };
                    Step::Pending
                }
                READ_REQ => Step::ReadRequest {
                    aborted_frame: false,
                },
                _ => Step::Discarded,
            },
            State::Payload { escaped: true } => self.store(byte),
            State::Payload { escaped: false } => match byte {
                ESCAPE => {
                    self.state = State::Payload { escaped: true };
                    Step::Pending
                }
                START_WRITE => {
                    self.pos = 0;
                    Step::Resync
                }
                END_WRITE => {
                    let complete = self.pos == self.buf.len();
                    self.reset();
                    if complete { Step::Complete } else { Step::Dropped }
                }
                READ_REQ => {
                    self.reset();
                    Step::ReadRequest {
                        aborted_frame: true,
                    }
                }
                _ => self.store(byte),
            },
        }
    }

    fn store(&mut self, byte: u8) -> Step {
        if self.pos == self.buf.len() {
            self.reset();
            return Step::Dropped;
        }
        self.buf[self.pos] = byte;
        self.pos += 1;
        self.state = State::Payload { escaped: false };
        Step::Pending
    }

    fn reset(&mut self) {
        self.pos = 0;
        self.state = State::Idle;
    }
}

/// Host-side parser for a delimited read response.
#[derive(Debug, Default)]
pub struct ResponseParser {
    receiving: bool,
    escaped: bool,
    data: Vec<u8>,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the payload once the closing marker arrives.
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        if !self.receiving {
            if byte == START_WRITE {
                self.receiving = true;
                self.data.clear();
            }
            return None;
        }
        if self.escaped {
            self.escaped = false;
            self.data.push(byte);
            return None;
        }
        match byte {
            ESCAPE => self.escaped = true,
            START_WRITE => self.data.clear(),
            END_WRITE => {
                self.receiving = false;
                return Some(std::mem::take(&mut self.data));
            }
            _ => self.data.push(byte),
        }
        None
    }
}

/// Parse a complete delimited frame held in memory.
pub fn decode_frame(bytes: &[u8]) -> Result<Vec<u8>, RegisterError> {
    let mut parser = ResponseParser::new();
    bytes
        .iter()
        .find_map(|&b| parser.push(b))
        .ok_or_else(|| RegisterError::Protocol("frame has no end marker".into()))
}
