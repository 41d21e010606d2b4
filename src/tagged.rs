//! NaN-boxed tagged values.
//!
//! A cell is one 32-bit IEEE 754 float. Non-NaN floats are plain numbers;
//! NaN patterns carry a 6-bit tag, a 16-bit payload and a 1-bit meta flag:
//!
//! ```text
//! 31   30..23   22    21..16   15..0
//! meta exponent quiet tag      payload
//!      (0xFF)   (1)
//! ```

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

use crate::error::{vm_err, ErrorKind};
use crate::vm_ensure;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize,
)]
#[repr(u8)]
pub enum Tag {
    Number = 0,
    Sentinel = 1,
    Code = 2,
    String = 3,
    Local = 4,
    Builtin = 5,
    List = 6,
    StackRef = 7,
    RstackRef = 8,
    GlobalRef = 9,
    DataRef = 10,
}

const META_BIT: u32 = 1 << 31;
const EXPONENT_BITS: u32 = 0xFF << 23;
const QUIET_BIT: u32 = 1 << 22;
const TAG_SHIFT: u32 = 16;
const TAG_MASK: u32 = 0x3F;
const PAYLOAD_MASK: u32 = 0xFFFF;

/// One memory cell.
#[derive(Clone, Copy)]
pub struct Value(f32);

impl Value {
    pub const NIL: Value = Value::sentinel_const(0);
    pub const DEFAULT: Value = Value::sentinel_const(1);

    const fn sentinel_const(payload: i16) -> Value {
        let bits = EXPONENT_BITS
            | QUIET_BIT
            | ((Tag::Sentinel as u32) << TAG_SHIFT)
            | (payload as u16 as u32);
        Value(f32::from_bits(bits))
    }

    /// Wrap a float without validation. A NaN input stays a NaN pattern
    /// with tag bits zero, which still decodes as a number.
    pub fn number(x: f32) -> Value {
        Value(x)
    }

    /// Build a boxed value. Payload range is enforced by the `u16` type;
    /// `Tag::Number` is not boxable and must go through [`Value::number`].
    pub fn boxed(tag: Tag, payload: u16, meta: bool) -> Value {
        debug_assert!(tag != Tag::Number);
        let mut bits = EXPONENT_BITS
            | QUIET_BIT
            | ((tag as u32 & TAG_MASK) << TAG_SHIFT)
            | (payload as u32 & PAYLOAD_MASK);
        if meta {
            bits |= META_BIT;
        }
        Value(f32::from_bits(bits))
    }

    pub fn sentinel(payload: i16) -> Value {
        Value::boxed(Tag::Sentinel, payload as u16, false)
    }

    pub fn list_header(slots: u16) -> Value {
        Value::boxed(Tag::List, slots, false)
    }

    pub fn bits(self) -> u32 {
        self.0.to_bits()
    }

    pub fn from_bits(bits: u32) -> Value {
        Value(f32::from_bits(bits))
    }

    pub fn is_boxed(self) -> bool {
        self.0.is_nan()
    }

    /// Total: any non-NaN float, and any NaN whose tag bits are outside
    /// the known set (e.g. the quiet NaN produced by `0.0 / 0.0`), reads
    /// as a number.
    pub fn tag(self) -> Tag {
        if !self.is_boxed() {
            return Tag::Number;
        }
        let raw = ((self.bits() >> TAG_SHIFT) & TAG_MASK) as u8;
        Tag::try_from(raw).unwrap_or(Tag::Number)
    }

    pub fn payload(self) -> u16 {
        (self.bits() & PAYLOAD_MASK) as u16
    }

    pub fn payload_i16(self) -> i16 {
        self.payload() as i16
    }

    pub fn meta(self) -> bool {
        self.is_boxed() && self.bits() & META_BIT != 0
    }

    pub fn as_number(self) -> Option<f32> {
        if self.tag() == Tag::Number {
            Some(self.0)
        } else {
            None
        }
    }

    pub fn as_f32(self) -> f32 {
        self.0
    }

    pub fn is_number(self) -> bool {
        self.tag() == Tag::Number
    }

    pub fn is_list(self) -> bool {
        self.tag() == Tag::List
    }

    pub fn is_nil(self) -> bool {
        self == Value::NIL
    }

    pub fn is_default(self) -> bool {
        self == Value::DEFAULT
    }

    pub fn is_ref(self) -> bool {
        matches!(
            self.tag(),
            Tag::StackRef | Tag::RstackRef | Tag::GlobalRef | Tag::DataRef
        )
    }

    /// The absolute cell index a reference points at.
    pub fn target_cell(self) -> Option<usize> {
        if self.is_ref() {
            Some(self.payload() as usize)
        } else {
            None
        }
    }

    /// Branch and conditional truth: zero, NIL and every non-number are
    /// falsy.
    pub fn is_truthy(self) -> bool {
        match self.as_number() {
            Some(x) => x != 0.0,
            None => false,
        }
    }

    pub fn decode(self) -> Decoded {
        Decoded {
            tag: self.tag(),
            payload: if self.is_boxed() { self.payload() } else { 0 },
            meta: self.meta(),
            number: self.as_number(),
        }
    }
}

/// Checked codec entry point: validates tag and payload ranges.
pub fn encode(tag: u8, payload: i32, meta: bool) -> anyhow::Result<Value> {
    let tag = Tag::try_from(tag)
        .map_err(|_| vm_err(ErrorKind::Encoding, format!("unknown tag {tag}")))?;
    match tag {
        Tag::Number => Err(vm_err(
            ErrorKind::Encoding,
            "numbers carry their own bits; NUMBER is not boxable",
        )),
        Tag::Sentinel => {
            vm_ensure!(
                (i16::MIN as i32..=i16::MAX as i32).contains(&payload),
                Encoding,
                "sentinel payload {payload} out of i16 range"
            );
            Ok(Value::boxed(tag, payload as i16 as u16, meta))
        }
        _ => {
            vm_ensure!(
                (0..=u16::MAX as i32).contains(&payload),
                Encoding,
                "payload {payload} out of u16 range for {tag:?}"
            );
            Ok(Value::boxed(tag, payload as u16, meta))
        }
    }
}

/// Checked number encoding: rejects every NaN pattern, which would
/// alias a boxed value.
pub fn encode_number(x: f32) -> anyhow::Result<Value> {
    vm_ensure!(!x.is_nan(), Encoding, "NaN is not a representable number");
    Ok(Value::number(x))
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Decoded {
    pub tag: Tag,
    pub payload: u16,
    pub meta: bool,
    pub number: Option<f32>,
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag() {
            Tag::Number => write!(f, "{}", self.0),
            Tag::Sentinel => match self.payload_i16() {
                0 => write!(f, "NIL"),
                1 => write!(f, "DEFAULT"),
                n => write!(f, "SENTINEL({n})"),
            },
            tag => {
                write!(f, "{tag:?}({})", self.payload())?;
                if self.meta() {
                    write!(f, "*")?;
                }
                Ok(())
            }
        }
    }
}
