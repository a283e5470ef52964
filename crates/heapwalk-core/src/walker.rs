//! Heap walker

use crate::ephemeral::Ephemeral;
use crate::error::{EnumerationError, EnumerationResult};
use crate::identity::ClassIdentity;
use crate::runtime::{HostRuntime, IterationControl};

/// What a finished walk looked like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalkSummary {
    /// Objects handed to the visitor
    pub visited: usize,
    /// The visitor asked to stop before the heap was exhausted
    pub stopped_early: bool,
}

/// Drives one heap iteration of a runtime and hands each object to a visitor
/// as an [`Ephemeral`].
pub struct HeapWalker<'r, R: HostRuntime> {
    runtime: &'r R,
}

impl<'r, R: HostRuntime> HeapWalker<'r, R> {
    /// Walker over `runtime`'s heap
    pub fn new(runtime: &'r R) -> Self {
        Self { runtime }
    }

    /// Run a single heap iteration looking for `target`.
    ///
    /// The visitor sees every object the runtime reports, not only matches.
    /// Once it returns [`IterationControl::Stop`] it is not called again,
    /// even if the runtime keeps reporting objects. A runtime error becomes
    /// [`EnumerationError::WalkFailure`]; there is no retry.
    pub fn for_each<F>(&self, target: &ClassIdentity<R>, mut visit: F) -> EnumerationResult<WalkSummary>
    where
        F: for<'w> FnMut(Ephemeral<'w, R>) -> IterationControl,
    {
        let runtime = self.runtime;
        let mut summary = WalkSummary::default();

        let result = runtime.iterate_heap(target.token(), &mut |object| {
            if summary.stopped_early {
                return IterationControl::Stop;
            }
            summary.visited += 1;
            let control = visit(Ephemeral::new(runtime, object));
            if control.is_stop() {
                summary.stopped_early = true;
            }
            control
        });

        match result {
            Ok(()) => {
                tracing::trace!(
                    target: "heapwalk",
                    class = target.label(),
                    visited = summary.visited,
                    stopped_early = summary.stopped_early,
                    "heap walk finished"
                );
                Ok(summary)
            }
            Err(err) => {
                tracing::debug!(target: "heapwalk", class = target.label(), error = %err, "heap walk aborted");
                Err(EnumerationError::walk_failure(target.label(), err))
            }
        }
    }
}
