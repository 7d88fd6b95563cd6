// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Memory budget configuration and parsing.

use crate::MemoryError;
use std::fmt;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;
const GIB: usize = 1024 * MIB;

/// A hard memory ceiling for one buffer pool.
///
/// Budgets parse from human-readable strings: `"512M"`, `"512MB"`, `"1G"`,
/// `"2048K"`, or a plain byte count. Suffixes are case-insensitive and
/// binary (`1K = 1024`).
///
/// # Examples
/// ```
/// use memory_manager::MemoryBudget;
///
/// let b = MemoryBudget::parse("1G").unwrap();
/// assert_eq!(b.as_mb(), 1024);
/// assert_eq!(b.to_string(), "1 GB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct MemoryBudget {
    bytes: usize,
}

impl MemoryBudget {
    /// Creates a budget from a byte count.
    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    /// Creates a budget from megabytes.
    pub fn from_mb(mb: usize) -> Self {
        Self { bytes: mb * MIB }
    }

    /// Creates a budget from gigabytes.
    pub fn from_gb(gb: usize) -> Self {
        Self { bytes: gb * GIB }
    }

    /// Returns the budget in bytes.
    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Returns the budget in megabytes (truncated).
    pub fn as_mb(&self) -> usize {
        self.bytes / MIB
    }

    /// Parses a human-readable budget string.
    pub fn parse(s: &str) -> Result<Self, MemoryError> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();
        let digits_end = upper
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(upper.len());
        let (number, suffix) = upper.split_at(digits_end);

        let multiplier = match suffix.trim() {
            "" | "B" => 1,
            "K" | "KB" => KIB,
            "M" | "MB" => MIB,
            "G" | "GB" => GIB,
            _ => return Err(MemoryError::InvalidBudget(s.to_string())),
        };
        let value: usize = number
            .parse()
            .map_err(|_| MemoryError::InvalidBudget(s.to_string()))?;
        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| MemoryError::InvalidBudget(s.to_string()))?;

        if bytes == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        Ok(Self { bytes })
    }
}

impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bytes {
            b if b >= GIB && b % GIB == 0 => write!(f, "{} GB", b / GIB),
            b if b >= MIB && b % MIB == 0 => write!(f, "{} MB", b / MIB),
            b if b >= KIB && b % KIB == 0 => write!(f, "{} KB", b / KIB),
            b => write!(f, "{b} B"),
        }
    }
}

impl std::str::FromStr for MemoryBudget {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(MemoryBudget::parse("512M").unwrap().as_mb(), 512);
        assert_eq!(MemoryBudget::parse("512mb").unwrap().as_mb(), 512);
        assert_eq!(MemoryBudget::parse("2g").unwrap().as_mb(), 2048);
        assert_eq!(MemoryBudget::parse("1024K").unwrap().as_bytes(), MIB);
        assert_eq!(MemoryBudget::parse("1048576").unwrap().as_mb(), 1);
        assert_eq!(MemoryBudget::parse("  64 M ").unwrap().as_mb(), 64);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(MemoryBudget::parse(""), Err(MemoryError::InvalidBudget(_))));
        assert!(matches!(MemoryBudget::parse("abc"), Err(MemoryError::InvalidBudget(_))));
        assert!(matches!(MemoryBudget::parse("12T"), Err(MemoryError::InvalidBudget(_))));
        assert!(matches!(MemoryBudget::parse("0M"), Err(MemoryError::ZeroSizedAllocation)));
    }

    #[test]
    fn test_display() {
        assert_eq!(MemoryBudget::from_gb(1).to_string(), "1 GB");
        assert_eq!(MemoryBudget::from_mb(512).to_string(), "512 MB");
        assert_eq!(MemoryBudget::from_bytes(2048).to_string(), "2 KB");
        assert_eq!(MemoryBudget::from_bytes(100).to_string(), "100 B");
    }

    #[test]
    fn test_ordering() {
        assert!(MemoryBudget::from_mb(1) < MemoryBudget::from_gb(1));
    }
}
