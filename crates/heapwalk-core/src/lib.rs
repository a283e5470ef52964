//! # heapwalk-core
//!
//! Enumerates the live instances of a class in a managed runtime's heap and
//! hands them back as durable handles.
//!
//! ## Flow
//!
//! - **Resolve**: the caller's descriptor becomes a [`ClassIdentity`], once
//!   per request.
//! - **Walk**: the runtime iterates its heap exactly once; every object is
//!   shown to the session as an [`Ephemeral`] reference.
//! - **Filter**: only objects whose class is exactly the target match.
//! - **Marshal**: matches are upgraded to the runtime's durable handle type
//!   until the [`Limit`] is reached, which ends the walk.
//!
//! The runtime itself sits behind [`HostRuntime`] and is passed in by
//! reference. Walks are serialized per runtime instance.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod ephemeral;
pub mod filter;
pub mod identity;
pub mod limit;
mod lock;
mod marshal;
pub mod options;
pub mod query;
pub mod runtime;
pub mod session;
pub mod walker;

pub use ephemeral::Ephemeral;
pub use error::{BoxError, EnumerationError, EnumerationResult, ErrorKind};
pub use identity::ClassIdentity;
pub use limit::Limit;
pub use lock::ReentrantWalk;
pub use options::EnumerationOptions;
pub use query::InstanceQuery;
pub use runtime::{HostRuntime, IterationControl};
pub use session::{EnumerationSession, SessionState};
pub use walker::{HeapWalker, WalkSummary};

/// Enumerate the live instances of exactly `descriptor`'s class.
///
/// Handles come back in heap visitation order, which is not allocation
/// order. A limit of zero returns an empty vector without resolving the
/// descriptor or walking the heap.
pub fn enumerate_instances<R: HostRuntime>(
    runtime: &R,
    descriptor: &R::Descriptor,
    limit: impl Into<Limit>,
) -> EnumerationResult<Vec<R::Handle>> {
    EnumerationSession::new(runtime, limit.into(), EnumerationOptions::default()).run(descriptor)
}

/// Resolve a descriptor without walking.
pub fn resolve_class<R: HostRuntime>(
    runtime: &R,
    descriptor: &R::Descriptor,
) -> EnumerationResult<ClassIdentity<R>> {
    ClassIdentity::resolve(runtime, descriptor)
}

/// Count the live instances of exactly `descriptor`'s class without creating
/// any handles.
pub fn count_instances<R: HostRuntime>(runtime: &R, descriptor: &R::Descriptor) -> EnumerationResult<usize> {
    session::count(runtime, descriptor, EnumerationOptions::default())
}
