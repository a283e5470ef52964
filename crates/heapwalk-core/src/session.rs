//! Enumeration sessions
//!
//! A session serves exactly one request: resolve the descriptor, walk the
//! heap once, keep exact-class matches as durable handles until the limit is
//! hit, and hand the handles over in visitation order.

use crate::error::{EnumerationError, EnumerationResult};
use crate::filter;
use crate::identity::ClassIdentity;
use crate::limit::Limit;
use crate::lock;
use crate::marshal::{Marshaller, Quota};
use crate::options::EnumerationOptions;
use crate::runtime::{HostRuntime, IterationControl};
use crate::walker::HeapWalker;

/// Lifecycle of an [`EnumerationSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing has happened yet
    Created,
    /// Resolving the descriptor
    Resolving,
    /// Walking the heap
    Walking,
    /// Handles were returned
    Completed,
    /// An error was returned and every collected handle was released
    Failed,
}

/// One enumeration request against one runtime.
pub struct EnumerationSession<'r, R: HostRuntime> {
    runtime: &'r R,
    options: EnumerationOptions,
    state: SessionState,
    target: Option<ClassIdentity<R>>,
    marshaller: Marshaller<R>,
}

impl<'r, R: HostRuntime> EnumerationSession<'r, R> {
    /// New session returning at most `limit` handles
    pub fn new(runtime: &'r R, limit: Limit, options: EnumerationOptions) -> Self {
        Self {
            runtime,
            options,
            state: SessionState::Created,
            target: None,
            marshaller: Marshaller::new(limit),
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handles collected so far
    pub fn count(&self) -> usize {
        self.marshaller.count()
    }

    /// The resolved target, once resolution has succeeded
    pub fn target(&self) -> Option<&ClassIdentity<R>> {
        self.target.as_ref()
    }

    /// Run the request to completion.
    ///
    /// A zero limit returns immediately without resolving or walking.
    pub fn run(&mut self, descriptor: &R::Descriptor) -> EnumerationResult<Vec<R::Handle>> {
        debug_assert_eq!(self.state, SessionState::Created, "session reused");

        if self.marshaller.quota() == Quota::Exhausted {
            self.state = SessionState::Completed;
            return Ok(Vec::new());
        }

        let _walk_lock = match lock::acquire(self.runtime.runtime_id()) {
            Ok(guard) => guard,
            Err(err) => {
                return Err(self.fail(EnumerationError::walk_failure(format!("{descriptor:?}"), err)));
            }
        };

        self.state = SessionState::Resolving;
        let target = match ClassIdentity::resolve(self.runtime, descriptor) {
            Ok(target) => target,
            Err(err) => return Err(self.fail(err)),
        };

        if self.options.collect_first {
            if let Err(err) = self.runtime.collect_garbage() {
                return Err(self.fail(EnumerationError::walk_failure(target.label(), err)));
            }
        }

        self.state = SessionState::Walking;
        let mut upgrade_error: Option<R::Error> = None;
        let marshaller = &mut self.marshaller;
        let walked = HeapWalker::new(self.runtime).for_each(&target, |object| {
            if !filter::matches(&object, &target) {
                return IterationControl::Continue;
            }
            match marshaller.upgrade(object) {
                Ok(Quota::Open) => IterationControl::Continue,
                Ok(Quota::Exhausted) => IterationControl::Stop,
                Err(err) => {
                    upgrade_error = Some(err);
                    IterationControl::Stop
                }
            }
        });

        let finished = self.runtime.finish_walk();

        if let Some(err) = upgrade_error {
            let err = EnumerationError::reference_upgrade(target.label(), err);
            self.target = Some(target);
            return Err(self.fail_after_walk(err, finished));
        }
        if let Err(err) = walked {
            self.target = Some(target);
            return Err(self.fail_after_walk(err, finished));
        }
        if let Err(err) = finished {
            let err = EnumerationError::walk_failure(target.label(), err);
            self.target = Some(target);
            return Err(self.fail(err));
        }

        tracing::debug!(
            target: "heapwalk",
            class = target.label(),
            found = self.marshaller.count(),
            "enumeration complete"
        );
        self.target = Some(target);
        self.state = SessionState::Completed;
        Ok(self.marshaller.take_handles())
    }

    fn fail_after_walk(&mut self, err: EnumerationError, finished: Result<(), R::Error>) -> EnumerationError {
        if let Err(finish_err) = finished {
            tracing::warn!(target: "heapwalk", error = %finish_err, "finishing a failed walk also failed");
        }
        self.fail(err)
    }

    fn fail(&mut self, err: EnumerationError) -> EnumerationError {
        if self.marshaller.count() > 0 {
            tracing::debug!(
                target: "heapwalk",
                released = self.marshaller.count(),
                "releasing partial results"
            );
        }
        self.marshaller.discard();
        self.state = SessionState::Failed;
        tracing::warn!(target: "heapwalk", kind = %err.kind(), error = %err, "enumeration failed");
        err
    }
}

/// Count exact-class instances without creating any handles.
pub(crate) fn count<R: HostRuntime>(
    runtime: &R,
    descriptor: &R::Descriptor,
    options: EnumerationOptions,
) -> EnumerationResult<usize> {
    let _walk_lock = lock::acquire(runtime.runtime_id())
        .map_err(|err| EnumerationError::walk_failure(format!("{descriptor:?}"), err))?;

    let target = ClassIdentity::resolve(runtime, descriptor)?;
    if options.collect_first {
        runtime
            .collect_garbage()
            .map_err(|err| EnumerationError::walk_failure(target.label(), err))?;
    }

    let mut found = 0usize;
    let walked = HeapWalker::new(runtime).for_each(&target, |object| {
        if filter::matches(&object, &target) {
            found += 1;
        }
        IterationControl::Continue
    });
    let finished = runtime.finish_walk();
    walked?;
    finished.map_err(|err| EnumerationError::walk_failure(target.label(), err))?;
    Ok(found)
}
