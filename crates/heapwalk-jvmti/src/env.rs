//! The process-wide JVMTI environment

use std::ffi::{CStr, c_void};
use std::os::raw::c_char;
use std::ptr;

use heapwalk_jvmti_sys::{
    self as sys, jclass, jint, jlong, jobject, jvmtiCapabilities, jvmtiEnv, jvmtiHeapCallbacks,
    jvmtiInterface_1_,
};
use jni::JNIEnv;
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{JvmtiError, JvmtiResult, check};

static ENV: OnceCell<JvmtiEnv> = OnceCell::new();

/// Looks up a function in the table or fails with `MissingFunction`.
macro_rules! function {
    ($env:expr, $name:ident) => {
        $env.table()
            .$name
            .ok_or(JvmtiError::MissingFunction(stringify!($name)))?
    };
}

/// A JVMTI environment with `can_tag_objects`.
pub struct JvmtiEnv {
    raw: *mut jvmtiEnv,
}

// SAFETY: a JVMTI environment can be used from any thread attached to the VM,
// and every entry point we call is documented as thread-safe.
unsafe impl Send for JvmtiEnv {}
unsafe impl Sync for JvmtiEnv {}

impl JvmtiEnv {
    /// The environment for this process, created on first use.
    pub fn get_or_init(jni: &JNIEnv<'_>) -> JvmtiResult<&'static JvmtiEnv> {
        ENV.get_or_try_init(|| {
            let vm = jni.get_java_vm()?;
            // SAFETY: the pointer comes from a live VM.
            let env = unsafe { Self::from_vm(vm.get_java_vm_pointer())? };
            let mut capabilities = jvmtiCapabilities::empty();
            capabilities.set_can_tag_objects();
            env.add_capabilities(&capabilities)?;
            debug!(target: "heapwalk::jvmti", "JVMTI environment ready");
            Ok(env)
        })
    }

    /// Request a JVMTI 1.2 environment from `vm`.
    ///
    /// # Safety
    /// `vm` must point to a running Java VM.
    pub unsafe fn from_vm(vm: *mut jni::sys::JavaVM) -> JvmtiResult<Self> {
        let get_env = unsafe { (**vm).GetEnv }.ok_or(JvmtiError::MissingFunction("GetEnv"))?;
        let mut raw: *mut c_void = ptr::null_mut();
        let rc = unsafe { get_env(vm, &mut raw, sys::JVMTI_VERSION_1_2) };
        if rc != jni::sys::JNI_OK || raw.is_null() {
            return Err(JvmtiError::NoEnvironment(rc));
        }
        Ok(Self { raw: raw.cast() })
    }

    /// Wrap an environment obtained elsewhere, such as in `Agent_OnLoad`.
    ///
    /// # Safety
    /// `raw` must point to a JVMTI environment that has `can_tag_objects` and
    /// stays valid for as long as the returned value is used.
    pub unsafe fn from_raw(raw: *mut jvmtiEnv) -> Self {
        Self { raw }
    }

    /// Address of the environment, stable for the life of the process
    pub fn id(&self) -> usize {
        self.raw as usize
    }

    fn table(&self) -> &jvmtiInterface_1_ {
        // SAFETY: `raw` came from GetEnv and environments are never disposed.
        unsafe { &**self.raw }
    }

    pub fn add_capabilities(&self, capabilities: &jvmtiCapabilities) -> JvmtiResult<()> {
        let add = function!(self, AddCapabilities);
        check("AddCapabilities", unsafe { add(self.raw, capabilities) })
    }

    pub fn get_tag(&self, object: jobject) -> JvmtiResult<jlong> {
        let get = function!(self, GetTag);
        let mut tag: jlong = 0;
        check("GetTag", unsafe { get(self.raw, object, &mut tag) })?;
        Ok(tag)
    }

    pub fn set_tag(&self, object: jobject, tag: jlong) -> JvmtiResult<()> {
        let set = function!(self, SetTag);
        check("SetTag", unsafe { set(self.raw, object, tag) })
    }

    pub fn force_garbage_collection(&self) -> JvmtiResult<()> {
        let force = function!(self, ForceGarbageCollection);
        check("ForceGarbageCollection", unsafe { force(self.raw) })
    }

    /// Walk every object in the heap.
    ///
    /// # Safety
    /// `user_data` must be whatever the callbacks expect, and must stay valid
    /// until this call returns.
    pub unsafe fn iterate_through_heap(
        &self,
        heap_filter: jint,
        callbacks: &jvmtiHeapCallbacks,
        user_data: *const c_void,
    ) -> JvmtiResult<()> {
        let iterate = function!(self, IterateThroughHeap);
        check("IterateThroughHeap", unsafe {
            iterate(self.raw, heap_filter, ptr::null_mut(), callbacks, user_data)
        })
    }

    /// Objects carrying any of `tags`, as `(tag, local reference)` pairs.
    ///
    /// Objects that died since they were tagged are not returned.
    pub fn objects_with_tags(&self, tags: &[jlong]) -> JvmtiResult<Vec<(jlong, jobject)>> {
        let get = function!(self, GetObjectsWithTags);
        let tag_count = jint::try_from(tags.len()).map_err(|_| JvmtiError::Call {
            function: "GetObjectsWithTags",
            code: sys::JVMTI_ERROR_ILLEGAL_ARGUMENT,
        })?;

        let mut count: jint = 0;
        let mut objects: *mut jobject = ptr::null_mut();
        let mut found_tags: *mut jlong = ptr::null_mut();
        check("GetObjectsWithTags", unsafe {
            get(self.raw, tag_count, tags.as_ptr(), &mut count, &mut objects, &mut found_tags)
        })?;
        let _objects = Allocation::new(self, objects.cast());
        let _found_tags = Allocation::new(self, found_tags.cast());

        let count = usize::try_from(count).unwrap_or(0);
        Ok((0..count)
            // SAFETY: both arrays hold `count` elements.
            .map(|i| unsafe { (*found_tags.add(i), *objects.add(i)) })
            .collect())
    }

    /// JVM type signature of a class, such as `Lheapwalk/App;`
    pub fn class_signature(&self, class: jclass) -> JvmtiResult<String> {
        let get = function!(self, GetClassSignature);
        let mut signature: *mut c_char = ptr::null_mut();
        check("GetClassSignature", unsafe {
            get(self.raw, class, &mut signature, ptr::null_mut())
        })?;
        if signature.is_null() {
            return Err(JvmtiError::Call {
                function: "GetClassSignature",
                code: sys::JVMTI_ERROR_NULL_POINTER,
            });
        }
        let _signature = Allocation::new(self, signature.cast());
        // SAFETY: JVMTI returns a NUL-terminated modified UTF-8 string.
        Ok(unsafe { CStr::from_ptr(signature) }.to_string_lossy().into_owned())
    }

    fn deallocate(&self, mem: *mut u8) -> JvmtiResult<()> {
        let deallocate = function!(self, Deallocate);
        check("Deallocate", unsafe { deallocate(self.raw, mem) })
    }
}

/// Memory handed out by JVMTI, returned to it on drop.
struct Allocation<'e> {
    env: &'e JvmtiEnv,
    ptr: *mut u8,
}

impl<'e> Allocation<'e> {
    fn new(env: &'e JvmtiEnv, ptr: *mut u8) -> Self {
        Self { env, ptr }
    }
}

impl Drop for Allocation<'_> {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        if let Err(err) = self.env.deallocate(self.ptr) {
            warn!(target: "heapwalk::jvmti", error = %err, "failed to release JVMTI memory");
        }
    }
}
