//! Exploration configuration.
//!
//! [`Settings`] is the primitive configuration record: the way to explore,
//! the memory model to simulate, and optional result shaping. It follows a
//! fluent, move-based builder style — each `with_*` method consumes `self`
//! and returns the updated record — plus plain accessor/updater pairs for
//! callers that tweak an existing value.
//!
//! ```ignore
//! use weft::{Bounds, MemType, Settings, Way};
//!
//! let settings = Settings::new(Way::systematic(Bounds::NONE), MemType::TotalStoreOrder)
//!     .with_discard(|result| result.is_err().then_some(weft::Discard::ResultAndTrace));
//! ```

use crate::sct::bounds::Bounds;
use crate::types::{ExecResult, MemType};
use core::fmt;
use std::rc::Rc;

/// How much of a reported execution to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Discard {
    /// Keep the result, drop the trace.
    Trace,
    /// Drop the execution entirely.
    ResultAndTrace,
}

/// A discard policy: `None` keeps everything.
pub type DiscardFn = Rc<dyn Fn(&ExecResult) -> Option<Discard>>;

/// How to explore the program's interleavings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Way {
    /// Exhaustive bounded DPOR.
    Systematic(Bounds),
    /// `limit` executions under uniform random scheduling.
    Uniform {
        /// Seed for the deterministic generator.
        seed: u64,
        /// Number of executions.
        limit: usize,
    },
    /// `limit` executions under weighted random scheduling, redrawing the
    /// weights every `reuse` executions (a schedule swarm).
    Weighted {
        /// Seed for the deterministic generator.
        seed: u64,
        /// Number of executions.
        limit: usize,
        /// Executions per weight generation.
        reuse: usize,
    },
}

impl Way {
    /// Exhaustive exploration under the given bounds.
    #[must_use]
    pub const fn systematic(bounds: Bounds) -> Self {
        Self::Systematic(bounds)
    }

    /// Uniform random exploration.
    #[must_use]
    pub const fn uniform(seed: u64, limit: usize) -> Self {
        Self::Uniform { seed, limit }
    }

    /// Weighted random (swarm) exploration.
    #[must_use]
    pub const fn weighted(seed: u64, limit: usize, reuse: usize) -> Self {
        Self::Weighted { seed, limit, reuse }
    }
}

/// The primitive configuration record for an exploration.
#[derive(Clone)]
pub struct Settings {
    way: Way,
    memtype: MemType,
    discard: Option<DiscardFn>,
    debug_show: Option<Rc<dyn Fn(&ExecResult) -> String>>,
    debug_print: Option<Rc<dyn Fn(&str)>>,
}

impl Settings {
    /// Settings with the given way and memory model and no result shaping.
    #[must_use]
    pub fn new(way: Way, memtype: MemType) -> Self {
        Self {
            way,
            memtype,
            discard: None,
            debug_show: None,
            debug_print: None,
        }
    }

    /// Sets the discard policy.
    #[must_use]
    pub fn with_discard(
        mut self,
        discard: impl Fn(&ExecResult) -> Option<Discard> + 'static,
    ) -> Self {
        self.discard = Some(Rc::new(discard));
        self
    }

    /// Sets the renderer used in diagnostics for dropped results.
    #[must_use]
    pub fn with_debug_show(mut self, show: impl Fn(&ExecResult) -> String + 'static) -> Self {
        self.debug_show = Some(Rc::new(show));
        self
    }

    /// Sets the sink for engine diagnostics. Without one, diagnostics go
    /// to `tracing::debug!`.
    #[must_use]
    pub fn with_debug_print(mut self, print: impl Fn(&str) + 'static) -> Self {
        self.debug_print = Some(Rc::new(print));
        self
    }

    /// The way to explore.
    #[must_use]
    pub const fn way(&self) -> Way {
        self.way
    }

    /// Replaces the way.
    pub fn set_way(&mut self, way: Way) {
        self.way = way;
    }

    /// The memory model to simulate.
    #[must_use]
    pub const fn memtype(&self) -> MemType {
        self.memtype
    }

    /// Replaces the memory model.
    pub fn set_memtype(&mut self, memtype: MemType) {
        self.memtype = memtype;
    }

    /// Applies the discard policy to one result.
    #[must_use]
    pub fn discard_of(&self, result: &ExecResult) -> Option<Discard> {
        self.discard.as_ref().and_then(|f| f(result))
    }

    /// Renders a result for diagnostics.
    #[must_use]
    pub fn show(&self, result: &ExecResult) -> String {
        match &self.debug_show {
            Some(show) => show(result),
            None => format!("{result:?}"),
        }
    }

    /// Emits one engine diagnostic.
    pub fn debug(&self, message: &str) {
        match &self.debug_print {
            Some(print) => print(message),
            None => tracing::debug!(target: "weft", "{message}"),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("way", &self.way)
            .field("memtype", &self.memtype)
            .field("discard", &self.discard.is_some())
            .field("debug_show", &self.debug_show.is_some())
            .field("debug_print", &self.debug_print.is_some())
            .finish()
    }
}
