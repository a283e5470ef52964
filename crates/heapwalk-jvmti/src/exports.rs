//! JNI entry points for `heapwalk.Instances`
//!
//! ```java
//! package heapwalk;
//!
//! public final class Instances {
//!     public static native String ping();
//!     public static native Object[] getInstances(Class<?> klass, int limit);
//!
//!     public static Object[] getInstances(Class<?> klass);
//!     public static <T> List<T> getInstanceList(Class<T> klass, int limit);
//!     public static <T> List<T> getInstanceList(Class<T> klass);
//! }
//! ```
//!
//! Only the first two are native. The overloads without a limit pass
//! `Integer.MAX_VALUE`, which is larger than any heap can hold, so they
//! return every instance. `getInstanceList` casts each element with
//! `Class::cast`.

use heapwalk_core::{EnumerationError, ErrorKind, Limit};
use heapwalk_jvmti_sys::jint;
use jni::JNIEnv;
use jni::objects::{JClass, JObject, JObjectArray};
use jni::sys::{jobjectArray, jsize, jstring};
use thiserror::Error;
use tracing::error;

use crate::env::JvmtiEnv;
use crate::error::JvmtiError;
use crate::host::{ClassRef, enumerate_objects};

/// What `ping` returns once the library is loaded
pub const PING_RESPONSE: &str = "SuccessTest";

const ILLEGAL_ARGUMENT: &str = "java/lang/IllegalArgumentException";
const ILLEGAL_STATE: &str = "java/lang/IllegalStateException";

/// Anything that can go wrong between Java and the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Enumeration(#[from] EnumerationError),

    #[error(transparent)]
    Jvmti(#[from] JvmtiError),

    #[error("JNI error: {0}")]
    Jni(#[from] jni::errors::Error),
}

impl BridgeError {
    /// Java exception class thrown for this error
    pub fn exception_class(&self) -> &'static str {
        match self {
            BridgeError::Enumeration(err) if err.kind() == ErrorKind::UnknownType => ILLEGAL_ARGUMENT,
            _ => ILLEGAL_STATE,
        }
    }
}

/// Java `int` limit to a [`Limit`]. Negative limits return nothing.
pub fn limit_from_jint(limit: jint) -> Limit {
    Limit::at_most(usize::try_from(limit).unwrap_or(0))
}

fn throw(env: &mut JNIEnv<'_>, err: &BridgeError) {
    // A pending Java exception already explains the failure.
    if env.exception_check().unwrap_or(false) {
        return;
    }
    if let Err(throw_err) = env.throw_new(err.exception_class(), err.to_string()) {
        error!(
            target: "heapwalk::jvmti",
            error = %err,
            cause = %throw_err,
            "could not raise Java exception"
        );
    }
}

fn instances<'local>(
    env: &mut JNIEnv<'local>,
    target: &JClass<'local>,
    limit: jint,
) -> Result<JObjectArray<'local>, BridgeError> {
    let jvmti = JvmtiEnv::get_or_init(env)?;
    let class = ClassRef::new(jvmti, target.as_raw());
    let objects = enumerate_objects(jvmti, &class, limit_from_jint(limit))?;

    // At most `limit` objects, so the length fits a jsize.
    let array = env.new_object_array(objects.len() as jsize, target, JObject::null())?;
    for (index, raw) in objects.into_iter().enumerate() {
        // SAFETY: GetObjectsWithTags returned a local reference in this frame.
        let object = unsafe { JObject::from_raw(raw) };
        env.set_object_array_element(&array, index as jsize, &object)?;
        env.delete_local_ref(object)?;
    }
    Ok(array)
}

/// `static native String ping()`
#[unsafe(no_mangle)]
pub extern "system" fn Java_heapwalk_Instances_ping<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
) -> jstring {
    match env.new_string(PING_RESPONSE) {
        Ok(value) => value.into_raw(),
        Err(err) => {
            throw(&mut env, &BridgeError::Jni(err));
            std::ptr::null_mut()
        }
    }
}

/// `static native Object[] getInstances(Class<?> klass, int limit)`
///
/// Unknown or null classes raise `IllegalArgumentException`; every other
/// failure raises `IllegalStateException`.
#[unsafe(no_mangle)]
pub extern "system" fn Java_heapwalk_Instances_getInstances<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    target: JClass<'local>,
    limit: jint,
) -> jobjectArray {
    match instances(&mut env, &target, limit) {
        Ok(array) => array.into_raw(),
        Err(err) => {
            throw(&mut env, &err);
            std::ptr::null_mut()
        }
    }
}
