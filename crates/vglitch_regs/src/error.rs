use crate::layout::{Direction, FieldKind};
use thiserror::Error;

/// Rejected register layouts and backend configurations. All of these are
/// raised before any byte is decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("register layout declares no fields")]
    Empty,
    #[error("register name '{0}' can only be used once")]
    DuplicateName(String),
    #[error("register '{0}' must be at least one bit wide")]
    ZeroWidth(String),
    #[error("register '{name}' is {bits} bits wide, at most 64 are supported")]
    TooWide { name: String, bits: u32 },
    #[error("register '{name}' is {bits} bits wide, {kind} must be exactly 1")]
    KindWidth {
        name: String,
        kind: FieldKind,
        bits: u32,
    },
    #[error("invalid register specification '{0}'")]
    Malformed(String),
    #[error("{direction} buffer configured as {configured} bytes, declared fields need {required}")]
    WidthMismatch {
        direction: Direction,
        configured: usize,
        required: usize,
    },
    #[error("baud rate must be non-zero")]
    ZeroBaudRate,
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("unknown register: {0}")]
    UnknownField(String),
    #[error("value {value} is out of range for {bits}-bit {kind} register '{name}'")]
    OutOfRange {
        name: String,
        value: i128,
        bits: u32,
        kind: FieldKind,
    },
    #[error("register '{name}' is not an {expected} register")]
    WrongDirection { name: String, expected: Direction },
    #[error("buffer length mismatch: expected {expected} bytes, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("invalid assignment '{0}', expected name=value")]
    BadAssignment(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("read timed out")]
    Timeout,
    #[error("open serial port: {0}")]
    Serial(String),
    #[error("serial I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Layout(#[from] LayoutError),
}
