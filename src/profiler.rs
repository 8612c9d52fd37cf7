// src/profiler.rs
//! Scheduler profiler: named events and scoped spans.
//!
//! Output goes through the `log` facade under the `taskweave::profiler`
//! target, and only when the `profile` cargo feature is enabled.  Without
//! the feature every call compiles down to nothing, so instrumentation
//! can stay in place in release builds.

use crate::error::Result;

#[cfg(feature = "profile")]
use std::time::Instant;

/// Log target used for all profiler output.
#[cfg(feature = "profile")]
const TARGET: &str = "taskweave::profiler";

/// A named source of profiler events and spans.
///
/// # Example
///
/// ```rust
/// use taskweave::profiler::Profiler;
///
/// let profiler = Profiler::new("frame-graph").unwrap();
/// profiler.event("assets loaded");
/// {
///     let _span = profiler.span("simulation");
///     // ... timed work ...
/// }
/// ```
pub struct Profiler {
    #[cfg(feature = "profile")]
    name: String,
}

impl Profiler {
    /// Creates a profiler identified by `name` in the output stream.
    ///
    /// An empty name is replaced with a default identifier.
    pub fn new(name: &str) -> Result<Profiler> {
        #[cfg(feature = "profile")]
        {
            let name = if name.is_empty() { "taskweave" } else { name };
            Ok(Profiler {
                name: name.to_string(),
            })
        }
        #[cfg(not(feature = "profile"))]
        {
            let _ = name;
            Ok(Profiler {})
        }
    }

    /// Emits a point event.
    #[inline]
    pub fn event(&self, message: &str) {
        #[cfg(feature = "profile")]
        log::trace!(target: TARGET, "{}: {}", self.name, message);
        #[cfg(not(feature = "profile"))]
        let _ = message;
    }

    /// Opens a span that reports its duration when dropped.
    #[inline]
    pub fn span(&self, label: &str) -> ProfilerSpan<'_> {
        #[cfg(feature = "profile")]
        {
            log::trace!(target: TARGET, "{}: enter {}", self.name, label);
            ProfilerSpan {
                profiler: self,
                label: label.to_string(),
                start: Instant::now(),
            }
        }
        #[cfg(not(feature = "profile"))]
        {
            let _ = label;
            ProfilerSpan {
                _profiler: std::marker::PhantomData,
            }
        }
    }
}

/// A scoped profiler span; reports its duration when dropped.
pub struct ProfilerSpan<'p> {
    #[cfg(feature = "profile")]
    profiler: &'p Profiler,
    #[cfg(feature = "profile")]
    label: String,
    #[cfg(feature = "profile")]
    start: Instant,
    #[cfg(not(feature = "profile"))]
    _profiler: std::marker::PhantomData<&'p Profiler>,
}

impl Drop for ProfilerSpan<'_> {
    fn drop(&mut self) {
        #[cfg(feature = "profile")]
        log::trace!(
            target: TARGET,
            "{}: leave {} after {:?}",
            self.profiler.name,
            self.label,
            self.start.elapsed()
        );
    }
}
