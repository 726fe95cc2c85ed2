use crate::error::RegisterError;
use crate::layout::{Direction, FieldId, RegisterLayout};
use crate::snapshot::{SnapshotCell, SnapshotReader};
use std::sync::Arc;

/// Decoded values of every field of one direction, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterValues {
    direction: Direction,
    values: Vec<u64>,
}

impl RegisterValues {
    pub fn zeroed(layout: &RegisterLayout, direction: Direction) -> Self {
        Self {
            direction,
            values: vec![0; layout.field_count(direction)],
        }
    }

    pub fn from_bytes(
        layout: &RegisterLayout,
        direction: Direction,
        buf: &[u8],
    ) -> Result<Self, RegisterError> {
        let expected = layout.bytes(direction);
        if buf.len() != expected {
            return Err(RegisterError::LengthMismatch {
                expected,
                found: buf.len(),
            });
        }
        Ok(Self {
            direction,
            values: layout.unpack(direction, buf),
        })
    }

    /// Decode `buf` over the current values in place.
    pub fn fill_from_bytes(&mut self, layout: &RegisterLayout, buf: &[u8]) -> Result<(), RegisterError> {
        let expected = layout.bytes(self.direction);
        if buf.len() != expected {
            return Err(RegisterError::LengthMismatch {
                expected,
                found: buf.len(),
            });
        }
        self.values.resize(layout.field_count(self.direction), 0);
        layout.unpack_into(self.direction, buf, &mut self.values);
        Ok(())
    }

    pub fn to_bytes(&self, layout: &RegisterLayout) -> Vec<u8> {
        layout.pack(self.direction, &self.values)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn get(&self, id: FieldId) -> u64 {
        debug_assert_eq!(id.direction, self.direction);
        self.values.get(id.slot).copied().unwrap_or(0)
    }

    pub fn set(&mut self, id: FieldId, value: u64) {
        debug_assert_eq!(id.direction, self.direction);
        if let Some(slot) = self.values.get_mut(id.slot) {
            *slot = value;
        }
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.values
    }

    /// `(name, value)` pairs in declaration order.
    pub fn named<'a>(&'a self, layout: &'a RegisterLayout) -> impl Iterator<Item = (&'a str, u64)> {
        layout
            .fields_of(self.direction)
            .zip(self.values.iter().copied())
            .map(|(spec, value)| (spec.name.as_str(), value))
    }
}

/// Committed snapshot of both register directions.
///
/// The decoder is the only writer of the inbound side and the controller the
/// only writer of the outbound side; each side is read through its own
/// [`SnapshotCell`].
pub struct RegisterFile {
    layout: Arc<RegisterLayout>,
    inbound: Arc<SnapshotCell<RegisterValues>>,
    outbound: Arc<SnapshotCell<RegisterValues>>,
}

impl RegisterFile {
    pub fn new(layout: Arc<RegisterLayout>) -> Self {
        let inbound = RegisterValues::zeroed(&layout, Direction::In);
        let outbound = RegisterValues::zeroed(&layout, Direction::Out);
        Self {
            layout,
            inbound: Arc::new(SnapshotCell::new(inbound)),
            outbound: Arc::new(SnapshotCell::new(outbound)),
        }
    }

    pub fn layout(&self) -> &Arc<RegisterLayout> {
        &self.layout
    }

    pub fn commit_inbound(&self, values: RegisterValues) {
        debug_assert_eq!(values.direction(), Direction::In);
        self.inbound.publish(values);
    }

    /// Commit `values` and return the snapshot it replaced.
    pub fn swap_inbound(&self, values: Arc<RegisterValues>) -> Arc<RegisterValues> {
        debug_assert_eq!(values.direction(), Direction::In);
        self.inbound.swap(values)
    }

    pub fn publish_outbound(&self, values: RegisterValues) {
        debug_assert_eq!(values.direction(), Direction::Out);
        self.outbound.publish(values);
    }

    pub fn inbound(&self) -> Arc<RegisterValues> {
        self.inbound.load()
    }

    pub fn outbound(&self) -> Arc<RegisterValues> {
        self.outbound.load()
    }

    /// Number of inbound commits so far.
    pub fn inbound_version(&self) -> u64 {
        self.inbound.version()
    }

    pub fn inbound_reader(&self) -> SnapshotReader<RegisterValues> {
        SnapshotReader::new(Arc::clone(&self.inbound))
    }
}
