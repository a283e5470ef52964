//! Class identity resolution

use std::fmt;

use crate::error::{EnumerationError, EnumerationResult};
use crate::runtime::HostRuntime;

/// A resolved class, scoped to the runtime instance that resolved it.
///
/// Two identities are equal when they come from the same runtime instance
/// and carry the same class token. Names play no part in the comparison, so
/// same-named classes from different loaders stay distinct.
pub struct ClassIdentity<R: HostRuntime> {
    token: R::ClassToken,
    runtime_id: usize,
    label: String,
}

impl<R: HostRuntime> ClassIdentity<R> {
    /// Resolve `descriptor` against `runtime`.
    ///
    /// Nothing is cached: each call goes back to the runtime's metadata.
    pub fn resolve(runtime: &R, descriptor: &R::Descriptor) -> EnumerationResult<Self> {
        let label = format!("{descriptor:?}");
        match runtime.resolve_class(descriptor) {
            Ok(token) => {
                tracing::trace!(target: "heapwalk", descriptor = %label, token = ?token, "resolved class");
                Ok(Self {
                    token,
                    runtime_id: runtime.runtime_id(),
                    label,
                })
            }
            Err(err) => {
                tracing::debug!(target: "heapwalk", descriptor = %label, error = %err, "class resolution failed");
                Err(EnumerationError::unknown_type(label, err))
            }
        }
    }

    /// The runtime's class token
    pub fn token(&self) -> &R::ClassToken {
        &self.token
    }

    /// Id of the runtime instance this identity belongs to
    pub fn runtime_id(&self) -> usize {
        self.runtime_id
    }

    /// The descriptor this identity was resolved from, rendered for messages
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<R: HostRuntime> Clone for ClassIdentity<R> {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            runtime_id: self.runtime_id,
            label: self.label.clone(),
        }
    }
}

impl<R: HostRuntime> PartialEq for ClassIdentity<R> {
    fn eq(&self, other: &Self) -> bool {
        self.runtime_id == other.runtime_id && self.token == other.token
    }
}

impl<R: HostRuntime> Eq for ClassIdentity<R> {}

impl<R: HostRuntime> fmt::Debug for ClassIdentity<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassIdentity")
            .field("token", &self.token)
            .field("runtime_id", &self.runtime_id)
            .field("label", &self.label)
            .finish()
    }
}
