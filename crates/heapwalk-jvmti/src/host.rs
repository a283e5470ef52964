//! [`HostRuntime`] over a live JVM
//!
//! Classes are identified by JVMTI class tags and objects are pinned by
//! object tags. A tag is only a way to find the object again with
//! `GetObjectsWithTags` after the walk; it does not keep the object alive,
//! so objects collected between the walk and the lookup are dropped from
//! the result.
//!
//! Tagging, the walk, the lookup and restoring the previous tags all happen
//! under one walk lock per JVMTI environment. Tags are global to the
//! environment, so a second request must not see another request's tags.

use std::any::Any;
use std::cell::RefCell;
use std::ffi::c_void;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};

use heapwalk_core::{EnumerationResult, HostRuntime, IterationControl, Limit, enumerate_instances};
use heapwalk_jvmti_sys::{
    JVMTI_HEAP_FILTER_CLASS_UNTAGGED, JVMTI_VISIT_ABORT, jclass, jint, jlong, jobject,
    jvmtiHeapCallbacks,
};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::env::JvmtiEnv;
use crate::error::{JvmtiError, JvmtiResult};

/// First tag handed to an object. Class tags stay below it.
pub const OBJECT_TAG_BASE: jlong = 1 << 40;

static NEXT_CLASS_TAG: AtomicI64 = AtomicI64::new(1);
static NEXT_OBJECT_TAG: AtomicI64 = AtomicI64::new(OBJECT_TAG_BASE);

fn next_class_tag() -> jlong {
    NEXT_CLASS_TAG.fetch_add(1, Ordering::Relaxed)
}

fn next_object_tag() -> jlong {
    NEXT_OBJECT_TAG.fetch_add(1, Ordering::Relaxed)
}

/// A `java.lang.Class` reference passed in from Java.
pub struct ClassRef {
    raw: jclass,
    signature: Option<String>,
}

impl ClassRef {
    /// Wrap `raw`, looking up its signature for diagnostics.
    pub fn new(env: &JvmtiEnv, raw: jclass) -> Self {
        let signature = if raw.is_null() {
            None
        } else {
            env.class_signature(raw).ok()
        };
        Self { raw, signature }
    }

    pub fn as_raw(&self) -> jclass {
        self.raw
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }
}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.signature {
            Some(signature) => f.write_str(signature),
            None => write!(f, "jclass@{:p}", self.raw),
        }
    }
}

/// JVMTI tag of a class object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassTag(jlong);

impl ClassTag {
    pub fn get(self) -> jlong {
        self.0
    }
}

/// What the heap callback sees: the object's class tag and its tag slot.
pub struct TaggedSlot {
    class_tag: jlong,
    tag_ptr: *mut jlong,
}

impl TaggedSlot {
    pub fn class_tag(&self) -> ClassTag {
        ClassTag(self.class_tag)
    }
}

/// Unique tag placed on an enumerated object
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ObjectTag(jlong);

impl ObjectTag {
    pub fn get(&self) -> jlong {
        self.0
    }
}

struct Issued {
    tag: jlong,
    previous: jlong,
}

/// A JVM heap seen through JVMTI.
///
/// Every object tag issued by [`make_durable`](HostRuntime::make_durable) is
/// recorded. When the walk finishes, still under the walk lock, the tagged
/// objects are looked up and their original tags swapped back in; the
/// references found are kept for [`take_reclaimed`](Self::take_reclaimed).
pub struct JvmtiHost<'e> {
    env: &'e JvmtiEnv,
    issued: RefCell<Vec<Issued>>,
    reclaimed: RefCell<FxHashMap<jlong, jobject>>,
}

impl<'e> JvmtiHost<'e> {
    pub fn new(env: &'e JvmtiEnv) -> Self {
        Self {
            env,
            issued: RefCell::new(Vec::new()),
            reclaimed: RefCell::new(FxHashMap::default()),
        }
    }

    /// Number of object tags not yet reclaimed
    pub fn outstanding(&self) -> usize {
        self.issued.borrow().len()
    }

    /// Local references found when the last walk finished, keyed by the tag
    /// this host gave them.
    pub fn take_reclaimed(&self) -> FxHashMap<jlong, jobject> {
        mem::take(&mut *self.reclaimed.borrow_mut())
    }

    /// Find every object tagged by this host and restore its previous tag.
    ///
    /// Returns local references keyed by the tag this host gave them. Every
    /// object is restored even if one restore fails; the first failure is
    /// reported.
    pub fn reclaim(&self) -> JvmtiResult<FxHashMap<jlong, jobject>> {
        let issued = mem::take(&mut *self.issued.borrow_mut());
        if issued.is_empty() {
            return Ok(FxHashMap::default());
        }

        let tags: Vec<jlong> = issued.iter().map(|i| i.tag).collect();
        let previous: FxHashMap<jlong, jlong> = issued.iter().map(|i| (i.tag, i.previous)).collect();
        let found = self.env.objects_with_tags(&tags)?;

        let mut first_error = None;
        let mut objects = FxHashMap::default();
        for (tag, object) in found {
            let restore = previous.get(&tag).copied().unwrap_or(0);
            if let Err(err) = self.env.set_tag(object, restore) {
                first_error.get_or_insert(err);
            }
            objects.insert(tag, object);
        }
        debug!(
            target: "heapwalk::jvmti",
            issued = tags.len(),
            alive = objects.len(),
            "reclaimed object tags"
        );

        match first_error {
            Some(err) => Err(err),
            None => Ok(objects),
        }
    }
}

impl Drop for JvmtiHost<'_> {
    fn drop(&mut self) {
        if self.outstanding() == 0 {
            return;
        }
        if let Err(err) = self.reclaim() {
            warn!(target: "heapwalk::jvmti", error = %err, "object tags left behind");
        }
    }
}

/// Enumerate the exact instances of `class` as local references, in visit
/// order.
pub fn enumerate_objects(env: &JvmtiEnv, class: &ClassRef, limit: Limit) -> EnumerationResult<Vec<jobject>> {
    let host = JvmtiHost::new(env);
    let handles = enumerate_instances(&host, class, limit)?;
    let objects = order_by_tags(&handles, &host.take_reclaimed());
    debug!(
        target: "heapwalk::jvmti",
        class = ?class,
        enumerated = handles.len(),
        returned = objects.len(),
        "instances enumerated"
    );
    Ok(objects)
}

/// Local references for `handles`, in handle order.
///
/// Handles whose object was collected before the lookup are skipped.
pub fn order_by_tags(handles: &[ObjectTag], objects: &FxHashMap<jlong, jobject>) -> Vec<jobject> {
    handles
        .iter()
        .filter_map(|handle| objects.get(&handle.get()).copied())
        .collect()
}

struct VisitState<'a> {
    visitor: &'a mut dyn FnMut(&TaggedSlot) -> IterationControl,
    panic: Option<Box<dyn Any + Send>>,
}

unsafe extern "system" fn heap_iteration_callback(
    class_tag: jlong,
    _size: jlong,
    tag_ptr: *mut jlong,
    _length: jint,
    user_data: *mut c_void,
) -> jint {
    // SAFETY: user_data is the VisitState handed to IterateThroughHeap, which
    // outlives the iteration.
    let state = unsafe { &mut *user_data.cast::<VisitState<'_>>() };
    if state.panic.is_some() {
        return JVMTI_VISIT_ABORT;
    }

    let slot = TaggedSlot { class_tag, tag_ptr };
    match panic::catch_unwind(AssertUnwindSafe(|| (state.visitor)(&slot))) {
        Ok(IterationControl::Continue) => 0,
        Ok(IterationControl::Stop) => JVMTI_VISIT_ABORT,
        Err(payload) => {
            state.panic = Some(payload);
            JVMTI_VISIT_ABORT
        }
    }
}

impl HostRuntime for JvmtiHost<'_> {
    type Descriptor = ClassRef;
    type ClassToken = ClassTag;
    type RawObject = TaggedSlot;
    type Handle = ObjectTag;
    type Error = JvmtiError;

    fn runtime_id(&self) -> usize {
        self.env.id()
    }

    /// A class keeps the first tag it is given, so resolution is stable for
    /// the life of the class.
    fn resolve_class(&self, class: &ClassRef) -> JvmtiResult<ClassTag> {
        if class.as_raw().is_null() {
            return Err(JvmtiError::NullClass);
        }
        let existing = self.env.get_tag(class.as_raw())?;
        if existing != 0 {
            return Ok(ClassTag(existing));
        }
        let tag = next_class_tag();
        self.env.set_tag(class.as_raw(), tag)?;
        debug!(target: "heapwalk::jvmti", class = ?class, tag, "tagged class");
        Ok(ClassTag(tag))
    }

    fn iterate_heap(
        &self,
        _class_hint: &ClassTag,
        visitor: &mut dyn FnMut(&TaggedSlot) -> IterationControl,
    ) -> JvmtiResult<()> {
        let mut state = VisitState {
            visitor,
            panic: None,
        };
        let callbacks = jvmtiHeapCallbacks::iteration(Some(heap_iteration_callback));
        // SAFETY: `state` lives on this frame until the iteration returns.
        let result = unsafe {
            self.env.iterate_through_heap(
                JVMTI_HEAP_FILTER_CLASS_UNTAGGED,
                &callbacks,
                (&raw mut state).cast::<c_void>(),
            )
        };
        if let Some(payload) = state.panic.take() {
            panic::resume_unwind(payload);
        }
        result
    }

    fn class_of(&self, object: &TaggedSlot) -> ClassTag {
        object.class_tag()
    }

    fn make_durable(&self, object: &TaggedSlot) -> JvmtiResult<ObjectTag> {
        if object.tag_ptr.is_null() {
            return Err(JvmtiError::NullTagSlot);
        }
        let tag = next_object_tag();
        // SAFETY: the slot is valid for the callback that produced `object`,
        // and make_durable is only reachable from inside that callback.
        let previous = unsafe { object.tag_ptr.replace(tag) };
        self.issued.borrow_mut().push(Issued { tag, previous });
        Ok(ObjectTag(tag))
    }

    fn collect_garbage(&self) -> JvmtiResult<()> {
        self.env.force_garbage_collection()
    }

    fn finish_walk(&self) -> JvmtiResult<()> {
        let objects = self.reclaim()?;
        self.reclaimed.borrow_mut().extend(objects);
        Ok(())
    }
}
