//! Block/pixel coordinates and their normalization.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single grid point: block index pair plus in-block offsets.
///
/// Always normalized: `0 <= x, y < block_size` for the block size it was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    pub block_x: i64,
    pub block_y: i64,
    #[serde(rename = "x")]
    pub local_x: i64,
    #[serde(rename = "y")]
    pub local_y: i64,
}

impl Coordinate {
    /// Build from flattened global pixel coordinates.
    pub fn from_global(gx: i64, gy: i64, block_size: i64) -> Self {
        Self {
            block_x: gx.div_euclid(block_size),
            block_y: gy.div_euclid(block_size),
            local_x: gx.rem_euclid(block_size),
            local_y: gy.rem_euclid(block_size),
        }
    }

    /// Flattened global pixel coordinates: `block * block_size + local` per axis.
    /// `None` if either axis does not fit in an `i64`.
    pub fn to_global(&self, block_size: i64) -> Option<(i64, i64)> {
        let gx = self.block_x.checked_mul(block_size)?.checked_add(self.local_x)?;
        let gy = self.block_y.checked_mul(block_size)?.checked_add(self.local_y)?;
        Some((gx, gy))
    }
}

/// Carry an out-of-range pixel offset into the block index.
///
/// Returns `(block, local)` with `0 <= local < block_size`, or `None` if the block
/// index overflows.
pub fn normalize_axis(block: i64, px: i64, block_size: i64) -> Option<(i64, i64)> {
    let block = block.checked_add(px.div_euclid(block_size))?;
    Some((block, px.rem_euclid(block_size)))
}

/// A corner of the sampled rectangle as entered by the user; offsets may overflow the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Corner {
    pub block_x: i64,
    pub block_y: i64,
    pub px_x: i64,
    pub px_y: i64,
}

impl Corner {
    pub fn new(block_x: i64, block_y: i64, px_x: i64, px_y: i64) -> Self {
        Self {
            block_x,
            block_y,
            px_x,
            px_y,
        }
    }

    /// Normalize offsets into `[0, block_size)`, carrying overflow into the block indices.
    /// `None` when the carry overflows the block index.
    pub fn normalized(&self, block_size: i64) -> Option<Coordinate> {
        let (block_x, local_x) = normalize_axis(self.block_x, self.px_x, block_size)?;
        let (block_y, local_y) = normalize_axis(self.block_y, self.px_y, block_size)?;
        Some(Coordinate {
            block_x,
            block_y,
            local_x,
            local_y,
        })
    }
}

impl fmt::Display for Corner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.block_x, self.block_y, self.px_x, self.px_y)
    }
}

/// Parses `BX,BY,PX,PY` (whitespace around the numbers is ignored).
impl FromStr for Corner {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(format!("expected BX,BY,PX,PY but got {:?}", s));
        }
        let mut nums = [0i64; 4];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            *slot = part
                .parse::<i64>()
                .map_err(|e| format!("invalid number {:?}: {}", part, e))?;
        }
        Ok(Corner::new(nums[0], nums[1], nums[2], nums[3]))
    }
}
