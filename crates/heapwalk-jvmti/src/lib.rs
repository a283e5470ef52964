//! # heapwalk-jvmti
//!
//! Loads into a JVM as a JNI library and enumerates the live instances of a
//! Java class through JVMTI heap iteration.
//!
//! ## How a request runs
//!
//! - The target `java.lang.Class` gets a JVMTI class tag, reused on later
//!   requests.
//! - `IterateThroughHeap` visits every object whose class is tagged; the
//!   bridge keeps exact-class matches and gives each one a unique object tag.
//! - `GetObjectsWithTags` turns those tags back into references, in visit
//!   order, and the tags are put back the way they were.
//!
//! All three steps run under the same per-environment walk lock, so
//! concurrent requests never see each other's tags.
//!
//! The Java side is `heapwalk.Instances` (see `java/heapwalk/Instances.java`).

#![allow(clippy::not_unsafe_ptr_arg_deref)]

pub mod env;
pub mod error;
pub mod exports;
pub mod host;

pub use env::JvmtiEnv;
pub use error::{JvmtiError, JvmtiResult, error_name};
pub use exports::{BridgeError, PING_RESPONSE, limit_from_jint};
pub use host::{
    ClassRef, ClassTag, JvmtiHost, OBJECT_TAG_BASE, ObjectTag, TaggedSlot, enumerate_objects, order_by_tags,
};
