//! JVMTI error handling

use heapwalk_jvmti_sys::{self as sys, jint, jvmtiError};
use thiserror::Error;

/// Errors raised by the JVMTI wrapper
#[derive(Debug, Error)]
pub enum JvmtiError {
    /// A JVMTI function returned something other than `JVMTI_ERROR_NONE`
    #[error("{function} failed: {} ({code})", error_name(*code))]
    Call {
        /// JVMTI function name
        function: &'static str,
        /// Raw error code
        code: jvmtiError,
    },

    /// The function table has no entry for a function we need
    #[error("JVMTI function {0} is not available")]
    MissingFunction(&'static str),

    /// `GetEnv` refused to hand out a JVMTI environment
    #[error("JVMTI environment unavailable (GetEnv returned {0})")]
    NoEnvironment(jint),

    /// A null class reference was passed in
    #[error("class reference is null")]
    NullClass,

    /// The heap callback was given no tag slot
    #[error("heap callback received no tag slot")]
    NullTagSlot,

    /// JNI call failed
    #[error("JNI error: {0}")]
    Jni(#[from] jni::errors::Error),
}

/// Result type for JVMTI operations
pub type JvmtiResult<T> = Result<T, JvmtiError>;

/// Symbolic name of a JVMTI error code
pub fn error_name(code: jvmtiError) -> &'static str {
    match code {
        sys::JVMTI_ERROR_NONE => "JVMTI_ERROR_NONE",
        sys::JVMTI_ERROR_INVALID_OBJECT => "JVMTI_ERROR_INVALID_OBJECT",
        sys::JVMTI_ERROR_INVALID_CLASS => "JVMTI_ERROR_INVALID_CLASS",
        sys::JVMTI_ERROR_MUST_POSSESS_CAPABILITY => "JVMTI_ERROR_MUST_POSSESS_CAPABILITY",
        sys::JVMTI_ERROR_NULL_POINTER => "JVMTI_ERROR_NULL_POINTER",
        sys::JVMTI_ERROR_ILLEGAL_ARGUMENT => "JVMTI_ERROR_ILLEGAL_ARGUMENT",
        sys::JVMTI_ERROR_OUT_OF_MEMORY => "JVMTI_ERROR_OUT_OF_MEMORY",
        sys::JVMTI_ERROR_ACCESS_DENIED => "JVMTI_ERROR_ACCESS_DENIED",
        sys::JVMTI_ERROR_WRONG_PHASE => "JVMTI_ERROR_WRONG_PHASE",
        sys::JVMTI_ERROR_INTERNAL => "JVMTI_ERROR_INTERNAL",
        sys::JVMTI_ERROR_UNATTACHED_THREAD => "JVMTI_ERROR_UNATTACHED_THREAD",
        sys::JVMTI_ERROR_INVALID_ENVIRONMENT => "JVMTI_ERROR_INVALID_ENVIRONMENT",
        _ => "JVMTI_ERROR_UNKNOWN",
    }
}

/// Turn a JVMTI return code into a result.
pub(crate) fn check(function: &'static str, code: jvmtiError) -> JvmtiResult<()> {
    if code == sys::JVMTI_ERROR_NONE {
        Ok(())
    } else {
        Err(JvmtiError::Call { function, code })
    }
}
