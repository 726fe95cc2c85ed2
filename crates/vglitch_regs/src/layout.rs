//! Register declarations and their placement in the per-direction buffers.
//!
//! Fields of one direction are packed in declaration order, first field in
//! the most significant bits of byte 0. The buffer is the sum of the field
//! widths rounded up to whole bytes; padding bits sit at the low end of the
//! last byte and are always zero.

use crate::error::LayoutError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const MAX_FIELD_BITS: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Host to controller.
    In,
    /// Controller to host.
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => f.pad("in"),
            Direction::Out => f.pad("out"),
        }
    }
}

fn default_direction() -> Direction {
    Direction::In
}

/// How a field's bits are read as a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Unsigned,
    /// Two's complement.
    Signed,
    /// Single bit.
    StdLogic,
    StdLogicVector,
}

impl FieldKind {
    /// Kind used when a declaration names none.
    pub fn default_for(bits: u32) -> Self {
        if bits == 1 {
            FieldKind::StdLogic
        } else {
            FieldKind::StdLogicVector
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            FieldKind::Unsigned => "unsigned",
            FieldKind::Signed => "signed",
            FieldKind::StdLogic => "std_logic",
            FieldKind::StdLogicVector => "std_logic_vector",
        })
    }
}

impl FromStr for FieldKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unsigned" => Ok(FieldKind::Unsigned),
            "signed" => Ok(FieldKind::Signed),
            "std_logic" => Ok(FieldKind::StdLogic),
            "std_logic_vector" => Ok(FieldKind::StdLogicVector),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FieldDecl")]
pub struct FieldSpec {
    pub name: String,
    pub bits: u32,
    pub direction: Direction,
    pub kind: FieldKind,
}

/// TOML form of a field, `kind` optional.
#[derive(Deserialize)]
struct FieldDecl {
    name: String,
    bits: u32,
    #[serde(default = "default_direction")]
    direction: Direction,
    #[serde(default)]
    kind: Option<FieldKind>,
}

impl From<FieldDecl> for FieldSpec {
    fn from(decl: FieldDecl) -> Self {
        let kind = decl.kind.unwrap_or(FieldKind::default_for(decl.bits));
        Self::new(decl.name, decl.bits, decl.direction).with_kind(kind)
    }
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, bits: u32, direction: Direction) -> Self {
        Self {
            name: name.into(),
            bits,
            direction,
            kind: FieldKind::default_for(bits),
        }
    }

    pub fn with_kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }

    /// Largest raw bit pattern the field can hold.
    pub fn max_value(&self) -> u64 {
        mask(self.bits)
    }

    /// Smallest number the host may write.
    pub fn min_int(&self) -> i128 {
        match self.kind {
            FieldKind::Signed => -(1i128 << (self.bits - 1)),
            _ => 0,
        }
    }

    /// Largest number the host may write.
    pub fn max_int(&self) -> i128 {
        match self.kind {
            FieldKind::Signed => (1i128 << (self.bits - 1)) - 1,
            _ => i128::from(self.max_value()),
        }
    }

    /// Raw bits for `value`, or `None` when it is out of range. Signed
    /// values are stored as two's complement.
    pub fn encode(&self, value: i128) -> Option<u64> {
        if value < self.min_int() || value > self.max_int() {
            return None;
        }
        // in range, so the low `bits` bits carry the value
        Some((value as u64) & self.max_value())
    }

    /// The number a raw bit pattern stands for, sign-extended for signed
    /// fields.
    pub fn decode(&self, raw: u64) -> i128 {
        let raw = raw & self.max_value();
        match self.kind {
            FieldKind::Signed if (raw >> (self.bits - 1)) & 1 == 1 => {
                i128::from(raw) - (1i128 << self.bits)
            }
            _ => i128::from(raw),
        }
    }
}

/// Parses `name=bits[:in|out[:kind]]`. Direction defaults to `in`, kind to
/// `std_logic` for one bit and `std_logic_vector` otherwise.
impl FromStr for FieldSpec {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || LayoutError::Malformed(s.to_string());
        let (name, rest) = s.split_once('=').ok_or_else(malformed)?;
        if name.is_empty() {
            return Err(malformed());
        }
        let mut parts = rest.split(':');
        let bits = parts
            .next()
            .and_then(|b| b.trim().parse::<u32>().ok())
            .ok_or_else(malformed)?;
        let direction = match parts.next() {
            None | Some("in") => Direction::In,
            Some("out") => Direction::Out,
            Some(_) => return Err(malformed()),
        };
        let kind = match parts.next() {
            None => FieldKind::default_for(bits),
            Some(kind) => kind.parse().map_err(|_| malformed())?,
        };
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(Self::new(name, bits, direction).with_kind(kind))
    }
}

/// Handle to a field, resolved once against a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId {
    pub direction: Direction,
    /// Position among the fields of the same direction.
    pub slot: usize,
}

#[derive(Debug, Clone, Copy)]
struct Placement {
    slot: usize,
    /// Bit offset from the MSB of byte 0.
    offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterLayout {
    fields: Vec<FieldSpec>,
    in_fields: Vec<usize>,
    out_fields: Vec<usize>,
    by_name: HashMap<String, usize>,
    in_bits: usize,
    out_bits: usize,
}

impl RegisterLayout {
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self, LayoutError> {
        if fields.is_empty() {
            return Err(LayoutError::Empty);
        }
        let mut by_name = HashMap::new();
        let mut in_fields = Vec::new();
        let mut out_fields = Vec::new();
        let mut in_bits = 0usize;
        let mut out_bits = 0usize;
        for (index, field) in fields.iter().enumerate() {
            if field.bits == 0 {
                return Err(LayoutError::ZeroWidth(field.name.clone()));
            }
            if field.bits > MAX_FIELD_BITS {
                return Err(LayoutError::TooWide {
                    name: field.name.clone(),
                    bits: field.bits,
                });
            }
            if field.kind == FieldKind::StdLogic && field.bits != 1 {
                return Err(LayoutError::KindWidth {
                    name: field.name.clone(),
                    kind: field.kind,
                    bits: field.bits,
                });
            }
            if by_name.insert(field.name.clone(), index).is_some() {
                return Err(LayoutError::DuplicateName(field.name.clone()));
            }
            match field.direction {
                Direction::In => {
                    in_fields.push(index);
                    in_bits += field.bits as usize;
                }
                Direction::Out => {
                    out_fields.push(index);
                    out_bits += field.bits as usize;
                }
            }
        }
        Ok(Self {
            fields,
            in_fields,
            out_fields,
            by_name,
            in_bits,
            out_bits,
        })
    }

    /// Parse a list of `name=bits[:dir[:kind]]` specifications.
    pub fn parse<S: AsRef<str>>(specs: &[S]) -> Result<Self, LayoutError> {
        let fields = specs
            .iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<Vec<FieldSpec>, _>>()?;
        Self::new(fields)
    }

    /// The layout the glitch controller is built around: a 1-bit start flag
    /// and a 32-bit delay sharing one 40-bit inbound buffer, and the
    /// controller status on the way out.
    pub fn glitch_default() -> Self {
        let fields = vec![
            FieldSpec::new("start_glitch", 1, Direction::In),
            FieldSpec::new("glitch_delay", 32, Direction::In).with_kind(FieldKind::Unsigned),
            FieldSpec::new("indicator", 2, Direction::Out),
            FieldSpec::new("glitch_output", 1, Direction::Out),
            FieldSpec::new("state", 2, Direction::Out),
            FieldSpec::new("glitch_count", 32, Direction::Out).with_kind(FieldKind::Unsigned),
        ];
        match Self::new(fields) {
            Ok(layout) => layout,
            Err(e) => unreachable!("built-in layout is valid: {e}"),
        }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Fields of one direction, in declaration order.
    pub fn fields_of(&self, direction: Direction) -> impl Iterator<Item = &FieldSpec> {
        self.indices(direction).iter().map(|&i| &self.fields[i])
    }

    pub fn field_count(&self, direction: Direction) -> usize {
        self.indices(direction).len()
    }

    pub fn bits(&self, direction: Direction) -> usize {
        match direction {
            Direction::In => self.in_bits,
            Direction::Out => self.out_bits,
        }
    }

    pub fn bytes(&self, direction: Direction) -> usize {
        self.bits(direction).div_ceil(8)
    }

    pub fn field(&self, name: &str) -> Option<(FieldId, &FieldSpec)> {
        let index = *self.by_name.get(name)?;
        let spec = &self.fields[index];
        let slot = self
            .indices(spec.direction)
            .iter()
            .position(|&i| i == index)?;
        Some((
            FieldId {
                direction: spec.direction,
                slot,
            },
            spec,
        ))
    }

    pub fn spec(&self, id: FieldId) -> &FieldSpec {
        &self.fields[self.indices(id.direction)[id.slot]]
    }

    fn indices(&self, direction: Direction) -> &[usize] {
        match direction {
            Direction::In => &self.in_fields,
            Direction::Out => &self.out_fields,
        }
    }

    fn placements(&self, direction: Direction) -> impl Iterator<Item = (Placement, &FieldSpec)> {
        let mut offset = 0usize;
        self.fields_of(direction)
            .enumerate()
            .map(move |(slot, spec)| {
                let placement = Placement { slot, offset };
                offset += spec.bits as usize;
                (placement, spec)
            })
    }

    /// Pack one value per field of `direction` into a fresh buffer.
    ///
    /// Values wider than their field are truncated to the field width; range
    /// checking against user input happens in the host client.
    pub fn pack(&self, direction: Direction, values: &[u64]) -> Vec<u8> {
        let mut buf = vec![0u8; self.bytes(direction)];
        for (placement, spec) in self.placements(direction) {
            let value = values.get(placement.slot).copied().unwrap_or(0) & spec.max_value();
            for i in 0..spec.bits as usize {
                let bit = (value >> (spec.bits as usize - 1 - i)) & 1;
                if bit == 1 {
                    let pos = placement.offset + i;
                    buf[pos / 8] |= 0x80 >> (pos % 8);
                }
            }
        }
        buf
    }

    /// Inverse of [`pack`](Self::pack). `buf` must be exactly the direction's
    /// byte width.
    pub fn unpack_into(&self, direction: Direction, buf: &[u8], values: &mut [u64]) {
        for (placement, spec) in self.placements(direction) {
            let mut value = 0u64;
            for i in 0..spec.bits as usize {
                let pos = placement.offset + i;
                let bit = (buf[pos / 8] >> (7 - pos % 8)) & 1;
                value = (value << 1) | u64::from(bit);
            }
            if let Some(slot) = values.get_mut(placement.slot) {
                *slot = value;
            }
        }
    }

    pub fn unpack(&self, direction: Direction, buf: &[u8]) -> Vec<u64> {
        let mut values = vec![0u64; self.field_count(direction)];
        self.unpack_into(direction, buf, &mut values);
        values
    }
}

pub fn mask(bits: u32) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_field_specs() {
        let f: FieldSpec = "glitch_delay=32".parse().unwrap();
        assert_eq!(f, FieldSpec::new("glitch_delay", 32, Direction::In));
        let f: FieldSpec = "indicator=2:out".parse().unwrap();
        assert_eq!(f.direction, Direction::Out);
        assert!("noequals".parse::<FieldSpec>().is_err());
        assert!("x=8:sideways".parse::<FieldSpec>().is_err());
        assert!("x=abc".parse::<FieldSpec>().is_err());
        assert!("=8".parse::<FieldSpec>().is_err());
    }

    #[test]
    fn parses_field_kinds() {
        let f: FieldSpec = "offset=8:in:signed".parse().unwrap();
        assert_eq!(f.kind, FieldKind::Signed);
        assert_eq!(f.direction, Direction::In);
        let f: FieldSpec = "count=16:out:unsigned".parse().unwrap();
        assert_eq!(f.kind, FieldKind::Unsigned);
        assert_eq!("flag=1".parse::<FieldSpec>().unwrap().kind, FieldKind::StdLogic);
        assert_eq!(
            "bus=4".parse::<FieldSpec>().unwrap().kind,
            FieldKind::StdLogicVector
        );
        assert!("x=8:in:float".parse::<FieldSpec>().is_err());
        assert!("x=8:in:signed:extra".parse::<FieldSpec>().is_err());
    }

    #[test]
    fn std_logic_must_be_one_bit() {
        assert!(matches!(
            RegisterLayout::parse(&["x=4:in:std_logic"]),
            Err(LayoutError::KindWidth { bits: 4, .. })
        ));
    }

    #[test]
    fn signed_fields_use_twos_complement() {
        let f: FieldSpec = "offset=8:in:signed".parse().unwrap();
        assert_eq!((f.min_int(), f.max_int()), (-128, 127));
        assert_eq!(f.encode(-1), Some(0xFF));
        assert_eq!(f.encode(-128), Some(0x80));
        assert_eq!(f.encode(127), Some(0x7F));
        assert_eq!(f.encode(128), None);
        assert_eq!(f.encode(-129), None);
        assert_eq!(f.decode(0xFF), -1);
        assert_eq!(f.decode(0x80), -128);
        assert_eq!(f.decode(0x7F), 127);

        let wide: FieldSpec = "w=64:in:signed".parse().unwrap();
        assert_eq!(wide.encode(i128::from(i64::MIN)), Some(1 << 63));
        assert_eq!(wide.decode(u64::MAX), -1);
    }

    #[test]
    fn unsigned_fields_reject_negatives() {
        let f: FieldSpec = "delay=32:in:unsigned".parse().unwrap();
        assert_eq!(f.encode(-1), None);
        assert_eq!(f.encode(0xFFFF_FFFF), Some(0xFFFF_FFFF));
        assert_eq!(f.encode(0x1_0000_0000), None);
        assert_eq!(f.decode(0xFFFF_FFFF), 0xFFFF_FFFF);
    }

    #[test]
    fn rejects_invalid_layouts() {
        assert_eq!(RegisterLayout::new(vec![]), Err(LayoutError::Empty));
        assert_eq!(
            RegisterLayout::parse(&["a=1", "a=2"]),
            Err(LayoutError::DuplicateName("a".into()))
        );
        assert_eq!(
            RegisterLayout::parse(&["a=0"]),
            Err(LayoutError::ZeroWidth("a".into()))
        );
        assert!(matches!(
            RegisterLayout::parse(&["a=65"]),
            Err(LayoutError::TooWide { bits: 65, .. })
        ));
    }

    #[test]
    fn flag_and_delay_share_forty_bits() {
        let layout = RegisterLayout::glitch_default();
        assert_eq!(layout.bits(Direction::In), 33);
        assert_eq!(layout.bytes(Direction::In), 5);
        assert_eq!(layout.bytes(Direction::Out), 5);
    }

    #[test]
    fn packs_msb_first_in_declaration_order() {
        let layout = RegisterLayout::parse(&["start_glitch=1", "glitch_delay=32"]).unwrap();
        let buf = layout.pack(Direction::In, &[1, 0x0000_0030]);
        // start bit, then the delay, then 7 padding bits
        assert_eq!(buf, vec![0x80, 0x00, 0x00, 0x18, 0x00]);

        let layout = RegisterLayout::parse(&["hi=4", "lo=4"]).unwrap();
        assert_eq!(layout.pack(Direction::In, &[0xA, 0x5]), vec![0xA5]);
    }

    #[test]
    fn unpack_ignores_padding() {
        let layout = RegisterLayout::parse(&["a=3", "b=2"]).unwrap();
        let values = layout.unpack(Direction::In, &[0b1011_0111]);
        assert_eq!(values, vec![0b101, 0b10]);
    }

    #[test]
    fn resolves_field_ids_per_direction() {
        let layout = RegisterLayout::glitch_default();
        let (id, spec) = layout.field("glitch_count").unwrap();
        assert_eq!(id, FieldId { direction: Direction::Out, slot: 3 });
        assert_eq!(spec.bits, 32);
        assert_eq!(layout.spec(id).name, "glitch_count");
        assert!(layout.field("missing").is_none());
    }

    #[test]
    fn sixty_four_bit_field_keeps_all_bits() {
        let layout = RegisterLayout::parse(&["wide=64", "flag=1"]).unwrap();
        let buf = layout.pack(Direction::In, &[u64::MAX, 1]);
        assert_eq!(layout.unpack(Direction::In, &buf), vec![u64::MAX, 1]);
    }
}
