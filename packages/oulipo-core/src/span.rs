use crate::error::{Error, Result};
use crate::ids::Identifier;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Half-open range overlap test: `[s1, e1)` and `[s2, e2)` share at least one position.
pub fn intersects(s1: u64, e1: u64, s2: u64, e2: u64) -> bool {
    e1 > s2 && e2 > s1
}

fn check_range(start: u64, width: u64) -> Result<()> {
    if start < 1 {
        return Err(Error::MalformedSpan(format!("start must be >= 1, got {start}")));
    }
    if width < 1 {
        return Err(Error::MalformedSpan(format!("width must be >= 1, got {width}")));
    }
    if start.checked_add(width).is_none() {
        return Err(Error::MalformedSpan(format!(
            "span {start}+{width} ends past the coordinate space"
        )));
    }
    Ok(())
}

/// Range of immutable content inside the invariant store of `home`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InvariantSpan {
    pub start: u64,
    pub width: u64,
    pub home: Identifier,
}

impl InvariantSpan {
    pub fn new(start: u64, width: u64, home: Identifier) -> Result<Self> {
        check_range(start, width)?;
        Ok(Self { start, width, home })
    }

    /// Exclusive end position.
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.width)
    }

    pub fn validate(&self) -> Result<()> {
        check_range(self.start, self.width)
    }

    /// Divide at an absolute `cut_point` into `[start, cut_point) | [cut_point, end)`.
    pub fn split(&self, cut_point: u64) -> Result<(Self, Self)> {
        if cut_point <= self.start || cut_point >= self.end() {
            return Err(Error::MalformedSpan(format!(
                "cut point {cut_point} is not inside ({}, {})",
                self.start,
                self.end()
            )));
        }
        let left = Self {
            start: self.start,
            width: cut_point - self.start,
            home: self.home.clone(),
        };
        let right = Self {
            start: cut_point,
            width: self.end() - cut_point,
            home: self.home.clone(),
        };
        Ok((left, right))
    }
}

/// User-visible range in the 1-based variant coordinate space of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VariantSpan {
    pub start: u64,
    pub width: u64,
}

impl VariantSpan {
    pub fn new(start: u64, width: u64) -> Result<Self> {
        check_range(start, width)?;
        Ok(Self { start, width })
    }

    /// Exclusive end position.
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.width)
    }

    pub fn validate(&self) -> Result<()> {
        check_range(self.start, self.width)
    }
}
