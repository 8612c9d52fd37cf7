// src/error.rs
//! Error types for the task scheduler with advanced conversion support

use std::fmt;

use crate::task::ValidationCode;

/// Errors that can occur while defining tasks, managing pools, or carving memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The pool has no free task slots
    PoolFull,
    /// Task argument data exceeds the in-slot buffer
    ArgsTooLarge,
    /// A dependency's permit list is full
    TooManyDependencies,
    /// No unbound pool of the requested type is available
    NoPoolAvailable,
    /// The requested pool type is not configured in the storage
    UnknownPoolType(u32),
    /// A task identifier is invalid or refers to a freed slot
    InvalidTaskId,
    /// The pool-type configuration failed validation
    InvalidConfig(ValidationCode),
    /// The supplied memory budget cannot hold the configured pools
    InsufficientMemory {
        /// Bytes required by the configuration
        required: usize,
        /// Bytes the caller made available
        available: usize,
    },
    /// The rounded allocation size exceeds the allocator's maximum block size
    AllocationTooLarge,
    /// No free block can satisfy the allocation
    OutOfMemory,
    /// The allocator was configured with invalid geometry
    InvalidAllocatorConfig(&'static str),
    /// I/O error (for compatibility)
    Io(String),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoolFull => write!(f, "Task pool has no free slots"),
            Self::ArgsTooLarge => write!(f, "Task argument data too large"),
            Self::TooManyDependencies => write!(f, "Dependency permit list is full"),
            Self::NoPoolAvailable => write!(f, "No unbound pool of the requested type"),
            Self::UnknownPoolType(id) => write!(f, "Pool type {} is not configured", id),
            Self::InvalidTaskId => write!(f, "Invalid task identifier"),
            Self::InvalidConfig(code) => write!(f, "Invalid pool configuration: {}", code),
            Self::InsufficientMemory {
                required,
                available,
            } => write!(
                f,
                "Insufficient memory: {} bytes required, {} available",
                required, available
            ),
            Self::AllocationTooLarge => write!(f, "Allocation exceeds maximum block size"),
            Self::OutOfMemory => write!(f, "No free block satisfies the allocation"),
            Self::InvalidAllocatorConfig(msg) => {
                write!(f, "Invalid allocator configuration: {}", msg)
            }
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TaskError {}

// ============================================================================
// ADVANCED ERROR CONVERSION - Makes the scheduler compatible with any error type
// ============================================================================

/// Convert TaskError to std::io::Error
impl From<TaskError> for std::io::Error {
    fn from(err: TaskError) -> Self {
        use std::io::ErrorKind;
        match err {
            TaskError::PoolFull | TaskError::NoPoolAvailable | TaskError::OutOfMemory => {
                std::io::Error::new(ErrorKind::WouldBlock, err)
            }
            TaskError::InsufficientMemory { .. } => {
                std::io::Error::new(ErrorKind::OutOfMemory, err)
            }
            TaskError::Io(msg) => std::io::Error::other(msg),
            _ => std::io::Error::new(ErrorKind::InvalidInput, err),
        }
    }
}

/// Convert std::io::Error to TaskError
impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        TaskError::Io(err.to_string())
    }
}

/// Convert TaskError to anyhow::Error (for application-level handlers)
#[cfg(feature = "anyhow")]
impl From<TaskError> for anyhow::Error {
    fn from(err: TaskError) -> Self {
        anyhow::anyhow!("{}", err)
    }
}

/// Allow using ? with anyhow::Error
#[cfg(feature = "anyhow")]
impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        TaskError::Io(err.to_string())
    }
}

// ============================================================================
// RESULT TYPE ALIASES
// ============================================================================

/// Result type alias for scheduler operations
///
/// Note: When using with other Result types (like anyhow::Result),
/// either qualify the type (`taskweave::Result<T>`) or use the conversion traits.
pub type Result<T> = std::result::Result<T, TaskError>;

// ============================================================================
// EXTENSION TRAIT FOR EASY CONVERSION
// ============================================================================

/// Extension trait for converting Results between different error types
pub trait ResultExt<T> {
    /// Convert to anyhow::Result
    #[cfg(feature = "anyhow")]
    fn into_anyhow(self) -> anyhow::Result<T>;

    /// Convert to io::Result
    fn into_io(self) -> std::io::Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    #[cfg(feature = "anyhow")]
    fn into_anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| e.into())
    }

    fn into_io(self) -> std::io::Result<T> {
        self.map_err(|e| e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_io() {
        let err = TaskError::PoolFull;
        let io_err: std::io::Error = err.into();
        assert_eq!(io_err.kind(), std::io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_result_ext() {
        let result: Result<u32> = Ok(42);
        let io_result = result.into_io();
        assert_eq!(io_result.unwrap(), 42);
    }

    #[test]
    fn test_display_carries_detail() {
        let err = TaskError::InsufficientMemory {
            required: 4096,
            available: 1024,
        };
        let text = err.to_string();
        assert!(text.contains("4096"));
        assert!(text.contains("1024"));
    }

    #[cfg(feature = "anyhow")]
    #[test]
    fn test_anyhow_conversion() {
        let err = TaskError::TooManyDependencies;
        let anyhow_err: anyhow::Error = err.into();
        assert!(anyhow_err.to_string().contains("permit list"));
    }
}
