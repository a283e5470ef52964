//! Reference marshalling: ephemeral objects in, durable handles out.

use crate::ephemeral::Ephemeral;
use crate::limit::Limit;
use crate::runtime::HostRuntime;

/// Whether more handles may be collected after an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Quota {
    Open,
    Exhausted,
}

/// Upgrades matched objects and keeps the handles in visitation order.
///
/// Holds `count == handles.len() <= limit` after every call.
pub(crate) struct Marshaller<R: HostRuntime> {
    handles: Vec<R::Handle>,
    limit: Limit,
}

impl<R: HostRuntime> Marshaller<R> {
    pub(crate) fn new(limit: Limit) -> Self {
        Self {
            handles: Vec::with_capacity(limit.capacity_hint()),
            limit,
        }
    }

    pub(crate) fn quota(&self) -> Quota {
        if self.limit.is_reached(self.handles.len()) {
            Quota::Exhausted
        } else {
            Quota::Open
        }
    }

    /// Upgrade one matched object.
    ///
    /// Must only be called while the quota is open.
    pub(crate) fn upgrade(&mut self, object: Ephemeral<'_, R>) -> Result<Quota, R::Error> {
        debug_assert_eq!(self.quota(), Quota::Open, "upgrade past the limit");
        let handle = object.upgrade()?;
        self.handles.push(handle);
        Ok(self.quota())
    }

    pub(crate) fn count(&self) -> usize {
        self.handles.len()
    }

    /// Release every handle collected so far.
    pub(crate) fn discard(&mut self) {
        self.handles.clear();
    }

    pub(crate) fn take_handles(&mut self) -> Vec<R::Handle> {
        std::mem::take(&mut self.handles)
    }
}
