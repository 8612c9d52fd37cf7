// src/task/config.rs
//! Pool-type configuration and validation.

use std::fmt;

use crate::task::id::{MAX_TASK_POOLS, MAX_TASKS_PER_POOL, MIN_TASKS_PER_POOL};

/// Pool type bound to the main application thread.
pub const POOL_TYPE_MAIN: u32 = 0;
/// Pool type bound to worker threads.  Every configuration must include
/// exactly one entry with this id.
pub const POOL_TYPE_WORKER: u32 = 1;
/// First id available for application-defined pool types.
pub const POOL_TYPE_USER: u32 = 2;

/// Configuration for one category of task pool.
#[derive(Debug, Clone)]
pub struct PoolTypeConfig {
    /// Identifier of the pool type, unique within a storage configuration.
    pub type_id: u32,
    /// Number of pools of this type.
    pub pool_count: u32,
    /// Number of queued ready tasks beyond which the pool posts a steal
    /// notification.  Zero means notify on every ready task.
    pub steal_threshold: u32,
    /// Maximum number of simultaneously live tasks per pool.  Must be a
    /// power of two in `[2, 65536]`.
    pub max_active_tasks: u32,
}

impl PoolTypeConfig {
    /// Configuration for the single main-thread pool.
    pub fn main_thread() -> Self {
        Self {
            type_id: POOL_TYPE_MAIN,
            pool_count: 1,
            steal_threshold: 0,
            max_active_tasks: 8192,
        }
    }

    /// Configuration for `pool_count` worker pools.
    pub fn worker(pool_count: u32) -> Self {
        Self {
            type_id: POOL_TYPE_WORKER,
            pool_count,
            steal_threshold: 1,
            max_active_tasks: 4096,
        }
    }

    /// Configuration for `pool_count` application pools (I/O producers,
    /// loaders and similar occasional task sources).
    pub fn background(pool_count: u32) -> Self {
        Self {
            type_id: POOL_TYPE_USER,
            pool_count,
            steal_threshold: 0,
            max_active_tasks: 256,
        }
    }
}

/// Outcome of validating a pool-type table entry or the table as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCode {
    /// No issue was detected.
    Success,
    /// A type's pool count, or the sum across all types, exceeds the
    /// maximum number of pools.
    TooManyPools,
    /// `max_active_tasks` exceeds the per-pool maximum.
    TooManyTasks,
    /// `max_active_tasks` is below the per-pool minimum.
    TooFewTasks,
    /// `max_active_tasks` is not a power of two.
    NotPowerOfTwo,
    /// The same type id appears more than once.
    DuplicateId,
    /// The steal threshold can never be crossed by the configured capacity.
    InvalidUsage,
    /// No entry uses [`POOL_TYPE_WORKER`].
    NoWorkerId,
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Success => "success",
            Self::TooManyPools => "too many pools",
            Self::TooManyTasks => "too many tasks per pool",
            Self::TooFewTasks => "too few tasks per pool",
            Self::NotPowerOfTwo => "max active tasks is not a power of two",
            Self::DuplicateId => "duplicate pool type id",
            Self::InvalidUsage => "steal threshold exceeds pool capacity",
            Self::NoWorkerId => "no worker pool type configured",
        };
        f.write_str(text)
    }
}

/// Validates a pool-type table.
///
/// Returns one code per entry plus a global code for table-wide problems
/// (total pool count, missing worker type).  The configuration is usable
/// only if every returned code is [`ValidationCode::Success`].
///
/// # Example
///
/// ```rust
/// use taskweave::task::{PoolTypeConfig, ValidationCode, validate_config};
///
/// let types = [PoolTypeConfig::main_thread(), PoolTypeConfig::worker(4)];
/// let (per_type, global) = validate_config(&types);
/// assert_eq!(global, ValidationCode::Success);
/// assert!(per_type.iter().all(|&c| c == ValidationCode::Success));
/// ```
pub fn validate_config(types: &[PoolTypeConfig]) -> (Vec<ValidationCode>, ValidationCode) {
    let mut per_type = vec![ValidationCode::Success; types.len()];
    let mut global = ValidationCode::Success;
    let mut total_pools: u64 = 0;
    let mut found_worker = false;

    for (i, config) in types.iter().enumerate() {
        total_pools += u64::from(config.pool_count);
        if config.type_id == POOL_TYPE_WORKER {
            found_worker = true;
        }
        if config.pool_count > MAX_TASK_POOLS {
            per_type[i] = ValidationCode::TooManyPools;
        }
        if config.max_active_tasks < MIN_TASKS_PER_POOL {
            per_type[i] = ValidationCode::TooFewTasks;
        }
        if config.max_active_tasks > MAX_TASKS_PER_POOL {
            per_type[i] = ValidationCode::TooManyTasks;
        }
        if !config.max_active_tasks.is_power_of_two() {
            per_type[i] = ValidationCode::NotPowerOfTwo;
        }
        if config.steal_threshold > config.max_active_tasks {
            per_type[i] = ValidationCode::InvalidUsage;
        }
        for (j, other) in types.iter().enumerate() {
            if i != j && config.type_id == other.type_id {
                per_type[i] = ValidationCode::DuplicateId;
                break;
            }
        }
    }

    if !found_worker {
        global = ValidationCode::NoWorkerId;
    } else if total_pools > u64::from(MAX_TASK_POOLS) {
        global = ValidationCode::TooManyPools;
    }
    (per_type, global)
}

/// Returns the first failing code of a validation outcome, if any.
pub(crate) fn first_failure(
    per_type: &[ValidationCode],
    global: ValidationCode,
) -> Option<ValidationCode> {
    if global != ValidationCode::Success {
        return Some(global);
    }
    per_type
        .iter()
        .copied()
        .find(|&code| code != ValidationCode::Success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config_passes() {
        let types = [
            PoolTypeConfig::main_thread(),
            PoolTypeConfig::worker(4),
            PoolTypeConfig::background(2),
        ];
        let (per_type, global) = validate_config(&types);
        assert_eq!(global, ValidationCode::Success);
        assert!(per_type.iter().all(|&c| c == ValidationCode::Success));
    }

    #[test]
    fn test_missing_worker_fails_globally() {
        let types = [PoolTypeConfig::main_thread()];
        let (_, global) = validate_config(&types);
        assert_eq!(global, ValidationCode::NoWorkerId);
    }

    #[test]
    fn test_non_power_of_two_flagged_per_type() {
        let mut worker = PoolTypeConfig::worker(2);
        worker.max_active_tasks = 100;
        let types = [PoolTypeConfig::main_thread(), worker];
        let (per_type, global) = validate_config(&types);
        assert_eq!(global, ValidationCode::Success);
        assert_eq!(per_type[0], ValidationCode::Success);
        assert_eq!(per_type[1], ValidationCode::NotPowerOfTwo);
    }

    #[test]
    fn test_task_count_bounds() {
        let mut low = PoolTypeConfig::worker(1);
        low.max_active_tasks = 1;
        let (per_type, _) = validate_config(&[low]);
        assert_eq!(per_type[0], ValidationCode::TooFewTasks);

        let mut high = PoolTypeConfig::worker(1);
        high.max_active_tasks = 131072;
        let (per_type, _) = validate_config(&[high]);
        assert_eq!(per_type[0], ValidationCode::TooManyTasks);
    }

    #[test]
    fn test_duplicate_ids_flagged() {
        let types = [PoolTypeConfig::worker(1), PoolTypeConfig::worker(1)];
        let (per_type, _) = validate_config(&types);
        assert_eq!(per_type[0], ValidationCode::DuplicateId);
        assert_eq!(per_type[1], ValidationCode::DuplicateId);
    }

    #[test]
    fn test_pool_sum_overflow_fails_globally() {
        let types = [
            PoolTypeConfig::worker(4000),
            PoolTypeConfig::background(1000),
        ];
        let (_, global) = validate_config(&types);
        assert_eq!(global, ValidationCode::TooManyPools);
    }

    #[test]
    fn test_threshold_beyond_capacity_is_invalid_usage() {
        let mut worker = PoolTypeConfig::worker(1);
        worker.steal_threshold = worker.max_active_tasks + 1;
        let (per_type, _) = validate_config(&[worker]);
        assert_eq!(per_type[0], ValidationCode::InvalidUsage);
    }
}
