//! Walks of one runtime from different threads never overlap.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use heapwalk_core::{HostRuntime, IterationControl, Limit, enumerate_instances};
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("no class named {0}")]
struct NoSuchClass(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    WalkStarted,
    WalkEnded,
    Finished,
}

/// Thread-safe runtime whose first walk stalls until told to go on.
struct SlowRuntime {
    objects: Vec<u32>,
    walks: AtomicUsize,
    stall: Duration,
    events: Mutex<Vec<Event>>,
}

impl SlowRuntime {
    fn new(stall: Duration) -> Self {
        Self {
            objects: vec![1, 2, 1, 1, 2],
            walks: AtomicUsize::new(0),
            stall,
            events: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }
}

impl HostRuntime for SlowRuntime {
    type Descriptor = str;
    type ClassToken = u32;
    type RawObject = u32;
    type Handle = u32;
    type Error = NoSuchClass;

    fn runtime_id(&self) -> usize {
        self as *const Self as usize
    }

    fn resolve_class(&self, descriptor: &str) -> Result<u32, NoSuchClass> {
        match descriptor {
            "App" => Ok(1),
            "Other" => Ok(2),
            _ => Err(NoSuchClass(descriptor.to_string())),
        }
    }

    fn iterate_heap(
        &self,
        _class_hint: &u32,
        visitor: &mut dyn FnMut(&u32) -> IterationControl,
    ) -> Result<(), NoSuchClass> {
        self.record(Event::WalkStarted);
        if self.walks.fetch_add(1, Ordering::SeqCst) == 0 {
            thread::sleep(self.stall);
        }
        for object in &self.objects {
            if visitor(object).is_stop() {
                break;
            }
        }
        self.record(Event::WalkEnded);
        Ok(())
    }

    fn class_of(&self, object: &u32) -> u32 {
        *object
    }

    fn make_durable(&self, object: &u32) -> Result<u32, NoSuchClass> {
        Ok(*object)
    }

    fn finish_walk(&self) -> Result<(), NoSuchClass> {
        self.record(Event::Finished);
        Ok(())
    }
}

#[test]
fn test_concurrent_enumerations_are_serialized() {
    let runtime = SlowRuntime::new(Duration::from_millis(100));

    let (first, second) = thread::scope(|scope| {
        let first = scope.spawn(|| enumerate_instances(&runtime, "App", Limit::UNBOUNDED));
        while runtime.walks.load(Ordering::SeqCst) == 0 {
            thread::yield_now();
        }
        // The first walk is now stalled while holding the walk lock.
        let second = scope.spawn(|| enumerate_instances(&runtime, "App", Limit::UNBOUNDED));
        (first.join().unwrap(), second.join().unwrap())
    });

    assert_eq!(first.unwrap(), vec![1, 1, 1]);
    assert_eq!(second.unwrap(), vec![1, 1, 1]);
    assert_eq!(
        *runtime.events.lock(),
        [
            Event::WalkStarted,
            Event::WalkEnded,
            Event::Finished,
            Event::WalkStarted,
            Event::WalkEnded,
            Event::Finished,
        ]
    );
}

#[test]
fn test_distinct_runtimes_walk_concurrently() {
    let slow = SlowRuntime::new(Duration::from_secs(1));
    let fast = SlowRuntime::new(Duration::ZERO);

    thread::scope(|scope| {
        let stalled = scope.spawn(|| enumerate_instances(&slow, "Other", Limit::UNBOUNDED));
        while slow.walks.load(Ordering::SeqCst) == 0 {
            thread::yield_now();
        }
        // Completes while the other runtime's walk is still stalled.
        assert_eq!(enumerate_instances(&fast, "Other", Limit::UNBOUNDED).unwrap(), vec![2, 2]);
        assert_eq!(*slow.events.lock(), [Event::WalkStarted]);
        assert_eq!(stalled.join().unwrap().unwrap(), vec![2, 2]);
    });
}
