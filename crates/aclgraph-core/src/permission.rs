//! Permission masks.
//!
//! A [`Permission`] is a 32-bit set of capability flags. The five well-known
//! bits follow the classic ACL layout (read=1, write=2, create=4, delete=8,
//! administration=16); the remaining bits are free for domain-specific use.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A bitset of capability flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(u32);

impl Permission {
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(1 << 1);
    pub const CREATE: Self = Self(1 << 2);
    pub const DELETE: Self = Self(1 << 3);
    pub const ADMINISTRATION: Self = Self(1 << 4);

    /// The empty mask. Never valid as a stored mask.
    pub const NONE: Self = Self(0);

    /// Wrap raw bits without validation.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Build a custom single-bit permission at `position` (0..32).
    pub const fn bit(position: u32) -> Self {
        Self(1 << position)
    }

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Validate a mask coming from an untyped source (config, database row).
    pub fn try_from_i64(value: i64) -> Result<Self, ValidationError> {
        if value <= 0 {
            return Err(ValidationError::NonPositiveMask(value));
        }
        let bits = u32::try_from(value).map_err(|_| ValidationError::MaskOutOfRange(value))?;
        Ok(Self(bits))
    }

    /// Look up one of the well-known bits by name.
    pub fn from_name(name: &str) -> Result<Self, ValidationError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Self::READ),
            "write" => Ok(Self::WRITE),
            "create" => Ok(Self::CREATE),
            "delete" => Ok(Self::DELETE),
            "administration" | "admin" => Ok(Self::ADMINISTRATION),
            other => Err(ValidationError::UnknownPermission(other.to_string())),
        }
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn is_single_bit(self) -> bool {
        self.0.is_power_of_two()
    }

    /// True if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if `self` and `other` share at least one bit.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// `self` with every bit of `other` cleared.
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Iterate over the individual bits that are set, lowest first.
    pub fn single_bits(self) -> impl Iterator<Item = Permission> {
        (0..32)
            .map(|i| 1u32 << i)
            .filter(move |b| self.0 & b != 0)
            .map(Permission)
    }
}

impl BitOr for Permission {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permission {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Permission({:#x})", self.0)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let named = [
            (Self::READ, "read"),
            (Self::WRITE, "write"),
            (Self::CREATE, "create"),
            (Self::DELETE, "delete"),
            (Self::ADMINISTRATION, "administration"),
        ];
        let mut parts: Vec<String> = Vec::new();
        for bit in self.single_bits() {
            match named.iter().find(|(p, _)| *p == bit) {
                Some((_, name)) => parts.push((*name).to_string()),
                None => parts.push(format!("{:#x}", bit.0)),
            }
        }
        if parts.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", parts.join("|"))
        }
    }
}

/// How a revoke treats entries whose mask only partly overlaps the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokeMode {
    /// Clear the requested bits; delete the entry once no bits remain.
    #[default]
    ClearBits,
    /// Delete only entries whose mask equals the request exactly.
    ExactMask,
}
