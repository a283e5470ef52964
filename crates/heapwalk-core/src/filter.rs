//! Instance filter

use crate::ephemeral::Ephemeral;
use crate::identity::ClassIdentity;
use crate::runtime::HostRuntime;

/// Exact class test: `true` only when the object's runtime class is the
/// target class itself. Instances of subclasses do not match.
#[inline]
pub fn matches<R: HostRuntime>(object: &Ephemeral<'_, R>, target: &ClassIdentity<R>) -> bool {
    object.class() == *target.token()
}
