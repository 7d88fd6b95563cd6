// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Buffer usage flags.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A set of usage flags describing how a buffer may be used.
///
/// The flag set mirrors the usages a compute device distinguishes. Host-side
/// tensor intermediates use [`BufferUsage::STORAGE`] alone.
///
/// # Examples
/// ```
/// use memory_manager::BufferUsage;
///
/// let staging = BufferUsage::MAP_READ | BufferUsage::COPY_DST;
/// assert!(staging.contains(BufferUsage::MAP_READ));
/// assert!(!staging.contains(BufferUsage::STORAGE));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferUsage(u32);

impl BufferUsage {
    /// Read-write storage binding.
    pub const STORAGE: Self = Self(1 << 0);
    /// Read-only storage binding.
    pub const STORAGE_READ: Self = Self(1 << 1);
    /// Source of a buffer-to-buffer copy.
    pub const COPY_SRC: Self = Self(1 << 2);
    /// Destination of a copy or queued write.
    pub const COPY_DST: Self = Self(1 << 3);
    /// Host may map the buffer for reading.
    pub const MAP_READ: Self = Self(1 << 4);
    /// Host may map the buffer for writing.
    pub const MAP_WRITE: Self = Self(1 << 5);
    /// Uniform binding.
    pub const UNIFORM: Self = Self(1 << 6);

    const NAMES: [(Self, &'static str); 7] = [
        (Self::STORAGE, "STORAGE"),
        (Self::STORAGE_READ, "STORAGE_READ"),
        (Self::COPY_SRC, "COPY_SRC"),
        (Self::COPY_DST, "COPY_DST"),
        (Self::MAP_READ, "MAP_READ"),
        (Self::MAP_WRITE, "MAP_WRITE"),
        (Self::UNIFORM, "UNIFORM"),
    ];

    /// The empty flag set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns the raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` when every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` when no flag is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for BufferUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for BufferUsage {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for BufferUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("BufferUsage(empty)");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "BufferUsage({})", names.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_and_union() {
        let mut u = BufferUsage::STORAGE;
        u |= BufferUsage::COPY_SRC;
        assert!(u.contains(BufferUsage::STORAGE | BufferUsage::COPY_SRC));
        assert!(!u.contains(BufferUsage::MAP_READ));
        assert!(u.contains(BufferUsage::empty()));
    }

    #[test]
    fn test_debug_lists_flags() {
        let u = BufferUsage::MAP_READ | BufferUsage::COPY_DST;
        assert_eq!(format!("{u:?}"), "BufferUsage(COPY_DST | MAP_READ)");
        assert_eq!(format!("{:?}", BufferUsage::empty()), "BufferUsage(empty)");
    }
}
