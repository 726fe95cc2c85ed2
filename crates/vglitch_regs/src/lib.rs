//! Serial-accessible register file for the glitch controller.
//!
//! A host writes the inbound registers as one packed buffer and reads the
//! outbound registers back the same way. [`backend::RegisterBackend`]
//! decodes the byte stream and commits complete buffers into a
//! [`file::RegisterFile`], which the controller samples once per tick.

pub mod backend;
pub mod diag;
pub mod error;
pub mod file;
pub mod framing;
pub mod host;
pub mod layout;
pub mod link;
pub mod snapshot;

pub use backend::{BackendConfig, FeedEvent, RegisterBackend};
pub use error::{LayoutError, RegisterError};
pub use file::{RegisterFile, RegisterValues};
pub use framing::Framing;
pub use layout::{Direction, FieldId, FieldKind, FieldSpec, RegisterLayout};
