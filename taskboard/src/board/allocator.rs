//! Sparse fractional position allocation.
//!
//! New positions are picked between the neighbours a task lands among, so a
//! move only ever rewrites the moved task's own key. Repeated midpoint
//! insertion into the same gap eventually runs out of `f64` precision; when
//! that happens the allocation is flagged and the column is renumbered onto an
//! integer ladder after the next successful sync.

use std::cmp::Ordering;

/// Gap left between consecutive tasks and used for head/tail insertion.
pub const DEFAULT_SPACING: f64 = 1000.0;

/// Result of a single allocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Allocation {
    /// The new sort key.
    pub position: f64,
    /// Set when the neighbours left no room and the column should be
    /// renumbered on the next successful sync.
    pub needs_renumber: bool,
}

impl Allocation {
    const fn fit(position: f64) -> Self {
        Self {
            position,
            needs_renumber: false,
        }
    }

    const fn degenerate(position: f64) -> Self {
        Self {
            position,
            needs_renumber: true,
        }
    }
}

/// Computes positions from neighbouring keys. Stateless apart from spacing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionAllocator {
    spacing: f64,
}

impl Default for PositionAllocator {
    fn default() -> Self {
        Self {
            spacing: DEFAULT_SPACING,
        }
    }
}

impl PositionAllocator {
    /// Creates an allocator with a custom spacing.
    ///
    /// Returns `None` unless `spacing` is finite and strictly positive.
    #[must_use]
    pub fn with_spacing(spacing: f64) -> Option<Self> {
        (spacing.is_finite() && spacing > 0.0).then_some(Self { spacing })
    }

    /// The configured spacing.
    #[must_use]
    pub const fn spacing(&self) -> f64 {
        self.spacing
    }

    /// Picks a position for a task landing between `before` and `after`.
    ///
    /// `before` is the key of the task displayed immediately above the
    /// insertion point and `after` the one immediately below; either may be
    /// absent at the column edges.
    #[must_use]
    pub fn allocate(&self, before: Option<f64>, after: Option<f64>) -> Allocation {
        match (before, after) {
            (None, None) => Allocation::fit(self.spacing),
            (None, Some(after)) => {
                let position = if after > 0.0 {
                    after / 2.0
                } else {
                    after - self.spacing
                };
                if position.is_finite() && position < after {
                    Allocation::fit(position)
                } else {
                    self.reset()
                }
            }
            (Some(before), None) => self.after_tail(before),
            (Some(before), Some(after)) => {
                if before.partial_cmp(&after) != Some(Ordering::Less) {
                    return self.fallback(before);
                }
                let mid = before + (after - before) / 2.0;
                if before < mid && mid < after {
                    Allocation::fit(mid)
                } else {
                    self.fallback(before)
                }
            }
        }
    }

    /// Integer ladder for a column of `len` tasks: `spacing, 2*spacing, ...`.
    #[must_use]
    pub fn renumber(&self, len: usize) -> Vec<f64> {
        (1..=len)
            .map(|rank| f64::from(u32::try_from(rank).unwrap_or(u32::MAX)) * self.spacing)
            .collect()
    }

    fn after_tail(&self, before: f64) -> Allocation {
        let position = before + self.spacing;
        if position.is_finite() && position > before {
            Allocation::fit(position)
        } else {
            self.fallback(before)
        }
    }

    fn fallback(&self, before: f64) -> Allocation {
        tracing::debug!(before, "neighbour positions exhausted; renumber scheduled");
        let position = before + self.spacing;
        if position.is_finite() {
            Allocation::degenerate(position)
        } else {
            self.reset()
        }
    }

    /// A finite placeholder for neighbours that are not usable numbers; the
    /// renumber pass gives the task its real key.
    fn reset(&self) -> Allocation {
        tracing::debug!("non-finite neighbour position; renumber scheduled");
        Allocation::degenerate(self.spacing)
    }
}
