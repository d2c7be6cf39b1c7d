//! Slot value representation (64-bit tagged word)
//!
//! Static fields, instance fields and local-variable slots all hold a
//! `Value`. The lowest 3 bits carry the type tag; payloads live in the
//! upper 32 bits.
//!
//! # Encoding Strategy
//!
//! ```text
//! reference: hhhhhhhhhhhhhhhhhhhhhhhhhhhhhhhh00000000000000000000000000000011
//! int:       iiiiiiiiiiiiiiiiiiiiiiiiiiiiiiii00000000000000000000000000000001
//! boolean:   000000000000000000000000000000000000000000000000000000000000b010
//! null:      0000000000000000000000000000000000000000000000000000000000000110
//! ```
//!
//! Object references are stored by [`ObjectHash`], never by address. A
//! reference to the null hash is normalized to `null`.

use crate::handle::ObjectHash;
use std::fmt;

/// Tagged slot value
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    // Tag constants (lowest 3 bits)
    const TAG_MASK: u64 = 0b111;
    const TAG_INT: u64 = 0b001;
    const TAG_BOOL: u64 = 0b010;
    const TAG_REF: u64 = 0b011;
    const TAG_NULL: u64 = 0b110;

    const NULL: u64 = Self::TAG_NULL;
    const TRUE: u64 = (1 << 3) | Self::TAG_BOOL;
    const FALSE: u64 = Self::TAG_BOOL;

    /// Create a null value
    #[inline]
    pub const fn null() -> Self {
        Value(Self::NULL)
    }

    /// Create a boolean value
    #[inline]
    pub const fn bool(b: bool) -> Self {
        Value(if b { Self::TRUE } else { Self::FALSE })
    }

    /// Create an int value
    #[inline]
    pub const fn int(i: i32) -> Self {
        Value((((i as u32) as u64) << 32) | Self::TAG_INT)
    }

    /// Create an object reference
    ///
    /// The null hash yields [`Value::null`].
    #[inline]
    pub const fn reference(hash: ObjectHash) -> Self {
        if hash.is_null() {
            Self::null()
        } else {
            Value(((hash.as_u32() as u64) << 32) | Self::TAG_REF)
        }
    }

    /// Check if this value is null
    #[inline]
    pub const fn is_null(&self) -> bool {
        self.0 == Self::NULL
    }

    /// Check if this value is an object reference
    #[inline]
    pub const fn is_reference(&self) -> bool {
        (self.0 & Self::TAG_MASK) == Self::TAG_REF
    }

    /// Extract the referenced object, if this slot holds a live reference
    #[inline]
    pub const fn as_reference(&self) -> Option<ObjectHash> {
        if self.is_reference() {
            Some(ObjectHash::new((self.0 >> 32) as u32))
        } else {
            None
        }
    }

    /// Extract int value
    #[inline]
    pub const fn as_int(&self) -> Option<i32> {
        if (self.0 & Self::TAG_MASK) == Self::TAG_INT {
            Some((self.0 >> 32) as u32 as i32)
        } else {
            None
        }
    }

    /// Extract boolean value
    #[inline]
    pub const fn as_bool(&self) -> Option<bool> {
        if (self.0 & Self::TAG_MASK) == Self::TAG_BOOL {
            Some((self.0 >> 3) != 0)
        } else {
            None
        }
    }

    /// Get raw bits (for debugging)
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Get type name for debugging
    pub const fn type_name(&self) -> &'static str {
        match self.0 & Self::TAG_MASK {
            Self::TAG_NULL => "null",
            Self::TAG_BOOL => "boolean",
            Self::TAG_INT => "int",
            Self::TAG_REF => "reference",
            _ => "unknown",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(hash) = self.as_reference() {
            write!(f, "ref({})", hash)
        } else if let Some(i) = self.as_int() {
            write!(f, "int({})", i)
        } else if let Some(b) = self.as_bool() {
            write!(f, "boolean({})", b)
        } else if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "Value({:#x})", self.0)
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::null()
    }
}

impl From<ObjectHash> for Value {
    fn from(hash: ObjectHash) -> Self {
        Value::reference(hash)
    }
}
