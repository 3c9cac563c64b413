//! 2D work partitioning for tiled dispatch.
//!
//! Dimension 0 covers output rows and dimension 1 output columns. Global sizes
//! are rounded up to whole tiles, so a launch may contain work-items past the
//! matrix edge; the kernel must guard them.

use std::fmt;
use tilegemm_common::GemmError;

/// Global and local work sizes for one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkPartition {
    /// Output shape the partition covers.
    pub output: [usize; 2],
    pub global: [usize; 2],
    pub local: [usize; 2],
}

impl WorkPartition {
    /// Work-groups per dimension.
    pub fn groups(&self) -> [usize; 2] {
        [self.global[0] / self.local[0], self.global[1] / self.local[1]]
    }

    pub fn work_items(&self) -> usize {
        self.global[0] * self.global[1]
    }

    /// Fraction of launched work-items that map to an output element.
    pub fn efficiency(&self) -> f64 {
        (self.output[0] * self.output[1]) as f64 / self.work_items() as f64
    }
}

impl fmt::Display for WorkPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [g0, g1] = self.groups();
        write!(
            f,
            "global {}x{}, local {}x{} ({g0}x{g1} groups, {:.1}% useful)",
            self.global[0],
            self.global[1],
            self.local[0],
            self.local[1],
            self.efficiency() * 100.0
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    #[error("tile size must be non-zero")]
    ZeroTile,
    #[error("output dimensions must be non-zero, got {rows}x{cols}")]
    ZeroDimension { rows: usize, cols: usize },
    #[error("rounding {dim} up to a multiple of {tile} overflows")]
    Overflow { dim: usize, tile: usize },
    #[error("work-group of {items} items exceeds the device limit of {limit}")]
    ExceedsDevice { items: usize, limit: usize },
}

impl From<PartitionError> for GemmError {
    fn from(err: PartitionError) -> Self {
        GemmError::dispatch("partition", err)
    }
}

fn round_up(dim: usize, tile: usize) -> Result<usize, PartitionError> {
    dim.div_ceil(tile).checked_mul(tile).ok_or(PartitionError::Overflow { dim, tile })
}

/// Cover a `rows x cols` output with `tile x tile` work-groups.
pub fn partition(rows: usize, cols: usize, tile: usize) -> Result<WorkPartition, PartitionError> {
    if tile == 0 {
        return Err(PartitionError::ZeroTile);
    }
    if rows == 0 || cols == 0 {
        return Err(PartitionError::ZeroDimension { rows, cols });
    }
    let global = [round_up(rows, tile)?, round_up(cols, tile)?];
    global[0].checked_mul(global[1]).ok_or(PartitionError::Overflow { dim: global[0], tile: global[1] })?;
    Ok(WorkPartition { output: [rows, cols], global, local: [tile, tile] })
}

/// Reject a partition whose work-group is larger than the device allows.
pub fn check_device_limits(partition: &WorkPartition, max_work_group_size: usize) -> Result<(), PartitionError> {
    let items = partition.local[0].saturating_mul(partition.local[1]);
    if items > max_work_group_size {
        return Err(PartitionError::ExceedsDevice { items, limit: max_work_group_size });
    }
    Ok(())
}
