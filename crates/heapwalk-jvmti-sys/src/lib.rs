//! Raw FFI bindings to the JVM Tool Interface
//!
//! Only the heap iteration, object tagging and memory management entry points
//! are declared. Unused slots of the function table are kept as opaque padding
//! so the declared entries sit at their JVMTI 1.2 indices.
//! Use the safe wrappers in `heapwalk-jvmti` for higher-level access.

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::ffi::c_void;
use std::os::raw::{c_char, c_uint};

pub use jni_sys::{jclass, jint, jlong, jobject};

/// Interface version requested through `JavaVM::GetEnv`
pub const JVMTI_VERSION_1_2: jint = 0x3001_0200;

pub type jvmtiError = c_uint;
pub const JVMTI_ERROR_NONE: jvmtiError = 0;
pub const JVMTI_ERROR_INVALID_OBJECT: jvmtiError = 20;
pub const JVMTI_ERROR_INVALID_CLASS: jvmtiError = 21;
pub const JVMTI_ERROR_MUST_POSSESS_CAPABILITY: jvmtiError = 99;
pub const JVMTI_ERROR_NULL_POINTER: jvmtiError = 100;
pub const JVMTI_ERROR_ILLEGAL_ARGUMENT: jvmtiError = 103;
pub const JVMTI_ERROR_OUT_OF_MEMORY: jvmtiError = 110;
pub const JVMTI_ERROR_ACCESS_DENIED: jvmtiError = 111;
pub const JVMTI_ERROR_WRONG_PHASE: jvmtiError = 112;
pub const JVMTI_ERROR_INTERNAL: jvmtiError = 113;
pub const JVMTI_ERROR_UNATTACHED_THREAD: jvmtiError = 115;
pub const JVMTI_ERROR_INVALID_ENVIRONMENT: jvmtiError = 116;

// Heap filter flags
pub const JVMTI_HEAP_FILTER_TAGGED: jint = 0x4;
pub const JVMTI_HEAP_FILTER_UNTAGGED: jint = 0x8;
pub const JVMTI_HEAP_FILTER_CLASS_TAGGED: jint = 0x10;
pub const JVMTI_HEAP_FILTER_CLASS_UNTAGGED: jint = 0x20;

// Heap visit control flags
pub const JVMTI_VISIT_OBJECTS: jint = 0x100;
pub const JVMTI_VISIT_ABORT: jint = 0x8000;

/// Capability set, 128 bits of flags in declaration order.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct jvmtiCapabilities {
    pub bits: [c_uint; 4],
}

/// Bit of `can_tag_objects`, the first declared capability
pub const CAN_TAG_OBJECTS: c_uint = 1 << 0;

impl jvmtiCapabilities {
    pub const fn empty() -> Self {
        Self { bits: [0; 4] }
    }

    pub fn set_can_tag_objects(&mut self) {
        self.bits[0] |= CAN_TAG_OBJECTS;
    }

    pub fn can_tag_objects(&self) -> bool {
        self.bits[0] & CAN_TAG_OBJECTS != 0
    }
}

// Callback types
pub type jvmtiHeapIterationCallback = Option<
    unsafe extern "system" fn(
        class_tag: jlong,
        size: jlong,
        tag_ptr: *mut jlong,
        length: jint,
        user_data: *mut c_void,
    ) -> jint,
>;

/// Callbacks for `IterateThroughHeap` and `FollowReferences`.
///
/// Only the iteration callback is typed; the remaining fifteen slots must be
/// null for a plain heap walk.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct jvmtiHeapCallbacks {
    pub heap_iteration_callback: jvmtiHeapIterationCallback,
    pub other_callbacks: [*const c_void; 15],
}

impl jvmtiHeapCallbacks {
    pub fn iteration(callback: jvmtiHeapIterationCallback) -> Self {
        Self {
            heap_iteration_callback: callback,
            other_callbacks: [std::ptr::null(); 15],
        }
    }
}

pub type jvmtiEnv = *const jvmtiInterface_1_;

/// JVMTI function table.
///
/// Field comments give the 1-based JVMTI function index.
#[repr(C)]
pub struct jvmtiInterface_1_ {
    _slots_1_45: [*const c_void; 45],
    /// 46
    pub Allocate: Option<
        unsafe extern "system" fn(env: *mut jvmtiEnv, size: jlong, mem_ptr: *mut *mut u8) -> jvmtiError,
    >,
    /// 47
    pub Deallocate: Option<unsafe extern "system" fn(env: *mut jvmtiEnv, mem: *mut u8) -> jvmtiError>,
    /// 48
    pub GetClassSignature: Option<
        unsafe extern "system" fn(
            env: *mut jvmtiEnv,
            klass: jclass,
            signature_ptr: *mut *mut c_char,
            generic_ptr: *mut *mut c_char,
        ) -> jvmtiError,
    >,
    _slots_49_105: [*const c_void; 57],
    /// 106
    pub GetTag: Option<
        unsafe extern "system" fn(env: *mut jvmtiEnv, object: jobject, tag_ptr: *mut jlong) -> jvmtiError,
    >,
    /// 107
    pub SetTag:
        Option<unsafe extern "system" fn(env: *mut jvmtiEnv, object: jobject, tag: jlong) -> jvmtiError>,
    /// 108
    pub ForceGarbageCollection: Option<unsafe extern "system" fn(env: *mut jvmtiEnv) -> jvmtiError>,
    _slots_109_113: [*const c_void; 5],
    /// 114
    pub GetObjectsWithTags: Option<
        unsafe extern "system" fn(
            env: *mut jvmtiEnv,
            tag_count: jint,
            tags: *const jlong,
            count_ptr: *mut jint,
            object_result_ptr: *mut *mut jobject,
            tag_result_ptr: *mut *mut jlong,
        ) -> jvmtiError,
    >,
    _slot_115: *const c_void,
    /// 116
    pub IterateThroughHeap: Option<
        unsafe extern "system" fn(
            env: *mut jvmtiEnv,
            heap_filter: jint,
            klass: jclass,
            callbacks: *const jvmtiHeapCallbacks,
            user_data: *const c_void,
        ) -> jvmtiError,
    >,
    _slots_117_141: [*const c_void; 25],
    /// 142
    pub AddCapabilities: Option<
        unsafe extern "system" fn(env: *mut jvmtiEnv, capabilities_ptr: *const jvmtiCapabilities) -> jvmtiError,
    >,
}
