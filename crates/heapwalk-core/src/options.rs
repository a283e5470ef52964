//! Enumeration options

use crate::limit::Limit;

/// Knobs for a single enumeration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnumerationOptions {
    /// Ask the runtime for a full collection before walking, so that
    /// garbage is not reported as live.
    pub collect_first: bool,
    /// Limit used when the request does not set one.
    pub default_limit: Limit,
}

impl EnumerationOptions {
    /// Options that collect before walking.
    pub fn collecting() -> Self {
        Self {
            collect_first: true,
            ..Self::default()
        }
    }
}
