//! Builder-style entry point

use crate::error::EnumerationResult;
use crate::limit::Limit;
use crate::options::EnumerationOptions;
use crate::runtime::HostRuntime;
use crate::session::{self, EnumerationSession};

/// A reusable description of an enumeration request.
///
/// ```no_run
/// # use heapwalk_core::{HostRuntime, InstanceQuery, EnumerationOptions};
/// # fn demo<R: HostRuntime>(runtime: &R, descriptor: &R::Descriptor) -> Result<(), heapwalk_core::EnumerationError> {
/// let handles = InstanceQuery::new(descriptor)
///     .limit(10)
///     .options(EnumerationOptions::collecting())
///     .run(runtime)?;
/// assert!(handles.len() <= 10);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct InstanceQuery<'d, D: ?Sized> {
    descriptor: &'d D,
    limit: Option<Limit>,
    options: EnumerationOptions,
}

impl<D: ?Sized> Clone for InstanceQuery<'_, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D: ?Sized> Copy for InstanceQuery<'_, D> {}

impl<'d, D: ?Sized> InstanceQuery<'d, D> {
    /// Query for instances of `descriptor`, unbounded unless the options say
    /// otherwise.
    pub fn new(descriptor: &'d D) -> Self {
        Self {
            descriptor,
            limit: None,
            options: EnumerationOptions::default(),
        }
    }

    /// Return at most `limit` handles
    pub fn limit(mut self, limit: impl Into<Limit>) -> Self {
        self.limit = Some(limit.into());
        self
    }

    /// Replace the options
    pub fn options(mut self, options: EnumerationOptions) -> Self {
        self.options = options;
        self
    }

    /// The limit this query will run with
    pub fn effective_limit(&self) -> Limit {
        self.limit.unwrap_or(self.options.default_limit)
    }

    /// Enumerate matching instances
    pub fn run<R>(self, runtime: &R) -> EnumerationResult<Vec<R::Handle>>
    where
        R: HostRuntime<Descriptor = D>,
    {
        EnumerationSession::new(runtime, self.effective_limit(), self.options).run(self.descriptor)
    }

    /// Count matching instances without creating handles. The limit is
    /// ignored.
    pub fn count<R>(self, runtime: &R) -> EnumerationResult<usize>
    where
        R: HostRuntime<Descriptor = D>,
    {
        session::count(runtime, self.descriptor, self.options)
    }
}
