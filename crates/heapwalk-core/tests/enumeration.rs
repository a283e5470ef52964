//! Enumeration tests against a scripted in-memory runtime.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use heapwalk_core::{
    EnumerationError, EnumerationOptions, EnumerationSession, ErrorKind, HeapWalker, HostRuntime,
    InstanceQuery, IterationControl, Limit, ReentrantWalk, SessionState, count_instances,
    enumerate_instances, resolve_class,
};
use proptest::prelude::*;
use thiserror::Error;

static NEXT_RUNTIME_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClassTag(u32);

struct FakeObject {
    class: ClassTag,
    value: i64,
}

#[derive(Debug, Error)]
enum FakeError {
    #[error("no class named {0}")]
    NoSuchClass(String),
    #[error("iteration aborted at object {0}")]
    Aborted(usize),
    #[error("handle quota of {0} exceeded")]
    HandlesExhausted(usize),
    #[error("collector unavailable")]
    CollectorUnavailable,
    #[error("could not settle walk")]
    FinishFailed,
}

#[derive(Debug)]
struct FakeHandle {
    value: i64,
    live: Rc<Cell<usize>>,
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

#[derive(Default)]
struct Script {
    fail_walk_at: Option<usize>,
    max_handles: Option<usize>,
    ignore_stop: bool,
    reenter: bool,
    collector_broken: bool,
    finish_broken: bool,
}

struct FakeRuntime {
    id: usize,
    classes: Vec<(&'static str, ClassTag)>,
    objects: Vec<FakeObject>,
    script: Script,
    live_handles: Rc<Cell<usize>>,
    resolutions: Cell<usize>,
    walks: Cell<usize>,
    collections: Cell<usize>,
    finishes: Cell<usize>,
    reentry: RefCell<Option<Result<usize, EnumerationError>>>,
    finish_reentry: RefCell<Option<Result<usize, EnumerationError>>>,
}

const APP: ClassTag = ClassTag(1);
const DERIVED_APP: ClassTag = ClassTag(2);
const OTHER: ClassTag = ClassTag(3);

impl FakeRuntime {
    fn new(objects: Vec<FakeObject>) -> Self {
        Self {
            id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
            classes: vec![("App", APP), ("DerivedApp", DERIVED_APP), ("Other", OTHER)],
            objects,
            script: Script::default(),
            live_handles: Rc::new(Cell::new(0)),
            resolutions: Cell::new(0),
            walks: Cell::new(0),
            collections: Cell::new(0),
            finishes: Cell::new(0),
            reentry: RefCell::new(None),
            finish_reentry: RefCell::new(None),
        }
    }

    fn with_script(mut self, script: Script) -> Self {
        self.script = script;
        self
    }
}

impl HostRuntime for FakeRuntime {
    type Descriptor = str;
    type ClassToken = ClassTag;
    type RawObject = FakeObject;
    type Handle = FakeHandle;
    type Error = FakeError;

    fn runtime_id(&self) -> usize {
        self.id
    }

    fn resolve_class(&self, descriptor: &str) -> Result<ClassTag, FakeError> {
        self.resolutions.set(self.resolutions.get() + 1);
        self.classes
            .iter()
            .find(|(name, _)| *name == descriptor)
            .map(|(_, tag)| *tag)
            .ok_or_else(|| FakeError::NoSuchClass(descriptor.to_string()))
    }

    fn iterate_heap(
        &self,
        _class_hint: &ClassTag,
        visitor: &mut dyn FnMut(&FakeObject) -> IterationControl,
    ) -> Result<(), FakeError> {
        self.walks.set(self.walks.get() + 1);
        if self.script.reenter {
            let nested = enumerate_instances(self, "App", Limit::UNBOUNDED).map(|handles| handles.len());
            self.reentry.replace(Some(nested));
        }
        for (index, object) in self.objects.iter().enumerate() {
            if self.script.fail_walk_at == Some(index) {
                return Err(FakeError::Aborted(index));
            }
            if visitor(object).is_stop() && !self.script.ignore_stop {
                break;
            }
        }
        Ok(())
    }

    fn class_of(&self, object: &FakeObject) -> ClassTag {
        object.class
    }

    fn make_durable(&self, object: &FakeObject) -> Result<FakeHandle, FakeError> {
        if let Some(max) = self.script.max_handles {
            if self.live_handles.get() >= max {
                return Err(FakeError::HandlesExhausted(max));
            }
        }
        self.live_handles.set(self.live_handles.get() + 1);
        Ok(FakeHandle {
            value: object.value,
            live: Rc::clone(&self.live_handles),
        })
    }

    fn collect_garbage(&self) -> Result<(), FakeError> {
        if self.script.collector_broken {
            return Err(FakeError::CollectorUnavailable);
        }
        self.collections.set(self.collections.get() + 1);
        Ok(())
    }

    fn finish_walk(&self) -> Result<(), FakeError> {
        self.finishes.set(self.finishes.get() + 1);
        let nested = enumerate_instances(self, "App", Limit::UNBOUNDED).map(|handles| handles.len());
        self.finish_reentry.replace(Some(nested));
        if self.script.finish_broken {
            return Err(FakeError::FinishFailed);
        }
        Ok(())
    }
}

fn apps(values: impl IntoIterator<Item = i64>) -> Vec<FakeObject> {
    values
        .into_iter()
        .map(|value| FakeObject { class: APP, value })
        .collect()
}

/// Ten `App`s with values 0..9, interleaved with three `DerivedApp`s and
/// some unrelated objects.
fn scenario_heap() -> Vec<FakeObject> {
    let mut objects = Vec::new();
    for value in 0..10 {
        objects.push(FakeObject { class: APP, value });
        if value % 3 == 0 && value < 9 {
            objects.push(FakeObject {
                class: DERIVED_APP,
                value: 100 + value,
            });
        }
        if value % 4 == 0 {
            objects.push(FakeObject { class: OTHER, value: -1 });
        }
    }
    objects
}

fn values(handles: &[FakeHandle]) -> Vec<i64> {
    handles.iter().map(|h| h.value).collect()
}

#[test]
fn test_unbounded_returns_every_instance() {
    let runtime = FakeRuntime::new(apps(0..10));
    let handles = enumerate_instances(&runtime, "App", Limit::UNBOUNDED).unwrap();
    assert_eq!(values(&handles), (0..10).collect::<Vec<_>>());
    assert_eq!(runtime.walks.get(), 1);
}

#[test]
fn test_limit_keeps_visitation_prefix() {
    let runtime = FakeRuntime::new(apps([7, 3, 9, 1, 4]));
    let handles = enumerate_instances(&runtime, "App", 3).unwrap();
    assert_eq!(values(&handles), vec![7, 3, 9]);
}

#[test]
fn test_zero_limit_touches_nothing() {
    let runtime = FakeRuntime::new(apps(0..10));
    let handles = enumerate_instances(&runtime, "NoSuchType", 0).unwrap();
    assert!(handles.is_empty());
    assert_eq!(runtime.resolutions.get(), 0);
    assert_eq!(runtime.walks.get(), 0);
}

#[test]
fn test_subclass_instances_are_excluded() {
    let runtime = FakeRuntime::new(scenario_heap());

    let mut found = values(&enumerate_instances(&runtime, "App", Limit::UNBOUNDED).unwrap());
    found.sort();
    assert_eq!(found, (0..10).collect::<Vec<_>>());

    let derived = enumerate_instances(&runtime, "DerivedApp", Limit::UNBOUNDED).unwrap();
    assert_eq!(values(&derived), vec![100, 103, 106]);
}

#[test]
fn test_resolution_is_idempotent() {
    let runtime = FakeRuntime::new(Vec::new());
    let first = resolve_class(&runtime, "App").unwrap();
    let second = resolve_class(&runtime, "App").unwrap();
    assert_eq!(first, second);
    assert_ne!(first, resolve_class(&runtime, "DerivedApp").unwrap());
    assert_eq!(runtime.resolutions.get(), 2);
}

#[test]
fn test_same_token_in_other_runtime_differs() {
    let a = FakeRuntime::new(Vec::new());
    let b = FakeRuntime::new(Vec::new());
    let in_a = resolve_class(&a, "App").unwrap();
    let in_b = resolve_class(&b, "App").unwrap();
    assert_eq!(in_a.token(), in_b.token());
    assert_ne!(in_a, in_b);
}

#[test]
fn test_unknown_type_is_isolated() {
    let runtime = FakeRuntime::new(apps(0..4));

    let err = enumerate_instances(&runtime, "Missing", Limit::UNBOUNDED).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::UnknownType);
    assert!(err.descriptor().contains("Missing"));
    assert_eq!(runtime.walks.get(), 0);
    assert_eq!(runtime.live_handles.get(), 0);

    let handles = enumerate_instances(&runtime, "App", Limit::UNBOUNDED).unwrap();
    assert_eq!(handles.len(), 4);
}

#[test]
fn test_walk_failure_releases_partial_results() {
    let runtime = FakeRuntime::new(apps(0..10)).with_script(Script {
        fail_walk_at: Some(6),
        ..Script::default()
    });

    let mut session = EnumerationSession::new(&runtime, Limit::UNBOUNDED, EnumerationOptions::default());
    let err = session.run("App").err().unwrap();
    assert_eq!(err.kind(), ErrorKind::WalkFailure);
    assert!(matches!(
        err.runtime_error().downcast_ref::<FakeError>(),
        Some(FakeError::Aborted(6))
    ));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(session.count(), 0);
    assert_eq!(runtime.live_handles.get(), 0);
}

#[test]
fn test_upgrade_failure_aborts_enumeration() {
    let runtime = FakeRuntime::new(apps(0..10)).with_script(Script {
        max_handles: Some(4),
        ..Script::default()
    });

    let err = enumerate_instances(&runtime, "App", Limit::UNBOUNDED).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::ReferenceUpgrade);
    assert_eq!(runtime.live_handles.get(), 0);

    // Within quota the same runtime still works.
    let handles = enumerate_instances(&runtime, "App", 4).unwrap();
    assert_eq!(values(&handles), vec![0, 1, 2, 3]);
}

#[test]
fn test_visitor_not_called_after_stop() {
    let runtime = FakeRuntime::new(apps(0..10)).with_script(Script {
        ignore_stop: true,
        ..Script::default()
    });

    let handles = enumerate_instances(&runtime, "App", 2).unwrap();
    assert_eq!(values(&handles), vec![0, 1]);

    let target = resolve_class(&runtime, "App").unwrap();
    let mut calls = 0;
    let summary = HeapWalker::new(&runtime)
        .for_each(&target, |_| {
            calls += 1;
            if calls == 3 {
                IterationControl::Stop
            } else {
                IterationControl::Continue
            }
        })
        .unwrap();
    assert_eq!(calls, 3);
    assert_eq!(summary.visited, 3);
    assert!(summary.stopped_early);
}

#[test]
fn test_walker_sees_every_object() {
    let runtime = FakeRuntime::new(scenario_heap());
    let target = resolve_class(&runtime, "App").unwrap();
    let mut matched = 0;
    let summary = HeapWalker::new(&runtime)
        .for_each(&target, |object| {
            if object.is_instance_of(&target) {
                matched += 1;
            }
            IterationControl::Continue
        })
        .unwrap();
    assert_eq!(summary.visited, runtime.objects.len());
    assert!(!summary.stopped_early);
    assert_eq!(matched, 10);
}

#[test]
fn test_collect_first() {
    let runtime = FakeRuntime::new(apps(0..3));
    let handles = InstanceQuery::new("App")
        .options(EnumerationOptions::collecting())
        .run(&runtime)
        .unwrap();
    assert_eq!(handles.len(), 3);
    assert_eq!(runtime.collections.get(), 1);

    let broken = FakeRuntime::new(apps(0..3)).with_script(Script {
        collector_broken: true,
        ..Script::default()
    });
    let err = InstanceQuery::new("App")
        .options(EnumerationOptions::collecting())
        .run(&broken)
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::WalkFailure);
    assert_eq!(broken.walks.get(), 0);
}

#[test]
fn test_query_default_limit() {
    let runtime = FakeRuntime::new(apps(0..10));
    let options = EnumerationOptions {
        default_limit: Limit::at_most(5),
        ..EnumerationOptions::default()
    };

    let query = InstanceQuery::new("App").options(options);
    assert_eq!(query.effective_limit(), Limit::at_most(5));
    assert_eq!(query.run(&runtime).unwrap().len(), 5);
    assert_eq!(query.limit(2).run(&runtime).unwrap().len(), 2);
}

#[test]
fn test_count_creates_no_handles() {
    let runtime = FakeRuntime::new(scenario_heap());
    assert_eq!(count_instances(&runtime, "App").unwrap(), 10);
    assert_eq!(count_instances(&runtime, "DerivedApp").unwrap(), 3);
    assert_eq!(InstanceQuery::new("Other").limit(1).count(&runtime).unwrap(), 3);
    assert_eq!(runtime.live_handles.get(), 0);
    assert_eq!(
        count_instances(&runtime, "Missing").err().map(|e| e.kind()),
        Some(ErrorKind::UnknownType)
    );
}

#[test]
fn test_reentrant_enumeration_fails() {
    let runtime = FakeRuntime::new(apps(0..3)).with_script(Script {
        reenter: true,
        ..Script::default()
    });

    let handles = enumerate_instances(&runtime, "App", Limit::UNBOUNDED).unwrap();
    assert_eq!(handles.len(), 3);

    let nested = runtime.reentry.borrow_mut().take().unwrap();
    let err = nested.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::WalkFailure);
    assert!(err.runtime_error().downcast_ref::<ReentrantWalk>().is_some());
}

#[test]
fn test_finish_walk_runs_under_walk_lock() {
    let runtime = FakeRuntime::new(apps(0..3));
    let handles = enumerate_instances(&runtime, "App", Limit::UNBOUNDED).unwrap();
    assert_eq!(handles.len(), 3);
    assert_eq!(runtime.finishes.get(), 1);

    let nested = runtime.finish_reentry.borrow_mut().take().unwrap();
    let err = nested.err().unwrap();
    assert!(err.runtime_error().downcast_ref::<ReentrantWalk>().is_some());
}

#[test]
fn test_finish_walk_runs_after_failed_walk() {
    let runtime = FakeRuntime::new(apps(0..5)).with_script(Script {
        fail_walk_at: Some(2),
        ..Script::default()
    });
    let err = enumerate_instances(&runtime, "App", Limit::UNBOUNDED).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WalkFailure);
    assert_eq!(runtime.finishes.get(), 1);
    assert_eq!(runtime.live_handles.get(), 0);
}

#[test]
fn test_finish_walk_failure_releases_handles() {
    let runtime = FakeRuntime::new(apps(0..4)).with_script(Script {
        finish_broken: true,
        ..Script::default()
    });
    let err = enumerate_instances(&runtime, "App", Limit::UNBOUNDED).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WalkFailure);
    assert!(matches!(
        err.runtime_error().downcast_ref::<FakeError>(),
        Some(FakeError::FinishFailed)
    ));
    assert_eq!(runtime.live_handles.get(), 0);
}

#[test]
fn test_count_finishes_walk() {
    let runtime = FakeRuntime::new(scenario_heap());
    assert_eq!(count_instances(&runtime, "App").unwrap(), 10);
    assert_eq!(runtime.finishes.get(), 1);
}

#[test]
fn test_session_states() {
    let runtime = FakeRuntime::new(apps(0..2));
    let mut session = EnumerationSession::new(&runtime, Limit::UNBOUNDED, EnumerationOptions::default());
    assert_eq!(session.state(), SessionState::Created);
    let handles = session.run("App").unwrap();
    assert_eq!(handles.len(), 2);
    assert_eq!(session.state(), SessionState::Completed);
    assert_eq!(session.target().map(|t| *t.token()), Some(APP));

    let mut failing = EnumerationSession::new(&runtime, Limit::UNBOUNDED, EnumerationOptions::default());
    assert!(failing.run("Missing").is_err());
    assert_eq!(failing.state(), SessionState::Failed);
    assert!(failing.target().is_none());
}

proptest! {
    #[test]
    fn prop_limit_is_respected(
        population in proptest::collection::vec(0u8..3, 0..64),
        limit in proptest::option::of(0usize..80),
    ) {
        let objects: Vec<FakeObject> = population
            .iter()
            .enumerate()
            .map(|(i, class)| FakeObject { class: ClassTag(u32::from(*class) + 1), value: i as i64 })
            .collect();
        let expected: Vec<i64> = objects
            .iter()
            .filter(|o| o.class == APP)
            .map(|o| o.value)
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        let runtime = FakeRuntime::new(objects);
        let handles = enumerate_instances(&runtime, "App", Limit::from(limit)).unwrap();
        prop_assert_eq!(values(&handles), expected);
        prop_assert_eq!(runtime.live_handles.get(), handles.len());
    }
}
