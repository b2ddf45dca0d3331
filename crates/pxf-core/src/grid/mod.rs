//! Coordinate generator.
//!
//! Expands two corners plus a stride into the full, shuffled list of grid
//! points for a job. Pure apart from the shuffle's randomness; no I/O.

mod coordinate;

pub use coordinate::{normalize_axis, Coordinate, Corner};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::job::ConfigError;

/// Largest grid a job may hold. The whole point list lives in memory and is
/// rewritten with every checkpoint.
pub const MAX_POINTS: usize = 10_000_000;

/// Number of points the sweep will produce, or an error for an invalid stride,
/// block size, out-of-range corner, or a grid larger than [`MAX_POINTS`].
pub fn point_count(
    start: &Corner,
    end: &Corner,
    step_x: i64,
    step_y: i64,
    block_size: i64,
) -> Result<usize, ConfigError> {
    let (min_gx, max_gx, min_gy, max_gy) = bounds(start, end, step_x, step_y, block_size)?;
    let nx = axis_count(min_gx, max_gx, step_x)?;
    let ny = axis_count(min_gy, max_gy, step_y)?;
    nx.checked_mul(ny)
        .filter(|n| *n <= MAX_POINTS)
        .ok_or(ConfigError::TooManyPoints { max: MAX_POINTS })
}

/// Generate every grid point in the inclusive rectangle between `start` and `end`,
/// swept by the stride, in uniformly shuffled order.
pub fn generate_points(
    start: &Corner,
    end: &Corner,
    step_x: i64,
    step_y: i64,
    block_size: i64,
) -> Result<Vec<Coordinate>, ConfigError> {
    generate_points_with(start, end, step_x, step_y, block_size, &mut rand::rng())
}

/// Like [`generate_points`] with a caller-supplied RNG (deterministic in tests).
pub fn generate_points_with<R: Rng + ?Sized>(
    start: &Corner,
    end: &Corner,
    step_x: i64,
    step_y: i64,
    block_size: i64,
    rng: &mut R,
) -> Result<Vec<Coordinate>, ConfigError> {
    let (min_gx, max_gx, min_gy, max_gy) = bounds(start, end, step_x, step_y, block_size)?;
    let nx = axis_count(min_gx, max_gx, step_x)?;
    let ny = axis_count(min_gy, max_gy, step_y)?;
    let count = point_count(start, end, step_x, step_y, block_size)?;

    // Offsets stay within [min, max], so none of this can overflow.
    let mut points = Vec::with_capacity(count);
    for ix in 0..nx as i64 {
        let gx = min_gx + ix * step_x;
        for iy in 0..ny as i64 {
            points.push(Coordinate::from_global(gx, min_gy + iy * step_y, block_size));
        }
    }
    points.shuffle(rng);
    Ok(points)
}

fn bounds(
    start: &Corner,
    end: &Corner,
    step_x: i64,
    step_y: i64,
    block_size: i64,
) -> Result<(i64, i64, i64, i64), ConfigError> {
    if block_size <= 0 {
        return Err(ConfigError::BlockSize(block_size));
    }
    if step_x < 1 || step_y < 1 {
        return Err(ConfigError::Stride { step_x, step_y });
    }
    let global = |c: &Corner| {
        c.normalized(block_size)
            .and_then(|n| n.to_global(block_size))
            .ok_or(ConfigError::OutOfRange)
    };
    let (g1x, g1y) = global(start)?;
    let (g2x, g2y) = global(end)?;
    Ok((g1x.min(g2x), g1x.max(g2x), g1y.min(g2y), g1y.max(g2y)))
}

fn axis_count(min: i64, max: i64, step: i64) -> Result<usize, ConfigError> {
    let span = max.checked_sub(min).ok_or(ConfigError::OutOfRange)?;
    let n = span / step + 1;
    usize::try_from(n).map_err(|_| ConfigError::TooManyPoints { max: MAX_POINTS })
}
