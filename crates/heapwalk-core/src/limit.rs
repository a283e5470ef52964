//! Result count limits

use std::fmt;

/// Upper bound on the number of handles an enumeration returns.
///
/// The default is [`Limit::UNBOUNDED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Limit(Option<usize>);

impl Limit {
    /// No bound: walk the whole heap.
    pub const UNBOUNDED: Limit = Limit(None);

    /// At most `n` results.
    pub const fn at_most(n: usize) -> Self {
        Limit(Some(n))
    }

    /// The bound, or `None` when unbounded.
    #[inline]
    pub fn get(self) -> Option<usize> {
        self.0
    }

    /// `true` for a limit of zero, which never touches the runtime.
    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == Some(0)
    }

    /// `true` once `count` results satisfy the limit.
    #[inline]
    pub fn is_reached(self, count: usize) -> bool {
        matches!(self.0, Some(n) if count >= n)
    }

    /// Initial capacity for a result buffer.
    pub(crate) fn capacity_hint(self) -> usize {
        self.0.map_or(16, |n| n.min(1024))
    }
}

impl From<usize> for Limit {
    fn from(n: usize) -> Self {
        Limit::at_most(n)
    }
}

impl From<Option<usize>> for Limit {
    fn from(n: Option<usize>) -> Self {
        Limit(n)
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(n) => write!(f, "{n}"),
            None => f.write_str("unbounded"),
        }
    }
}
