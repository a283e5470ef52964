//! Demo population and the commands that query it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Result, anyhow};
use heapwalk_core::{EnumerationOptions, InstanceQuery, Limit, count_instances};
use heapwalk_gc::{ClassId, GcHeader, GcTraceable, Handle, Heap, HeapConfig, LoaderId, TypeDescriptor};
use tracing::{debug, info};

use crate::config::DemoSection;

pub const APP: &str = "App";
pub const DERIVED_APP: &str = "DerivedApp";
const NOISE: &str = "Noise";

/// Instances per collector round
const NOISE_PER_ROUND: usize = 64;

#[derive(Debug)]
pub struct App {
    pub value: i64,
}

impl GcTraceable for App {
    const NEEDS_TRACE: bool = false;
    fn trace(&self, _tracer: &mut dyn FnMut(*const GcHeader)) {}
}

/// Subclass of [`App`]; never returned when enumerating `App`.
#[derive(Debug)]
#[allow(dead_code)]
pub struct DerivedApp {
    pub base: App,
    pub label: String,
}

impl GcTraceable for DerivedApp {
    const NEEDS_TRACE: bool = false;
    fn trace(&self, _tracer: &mut dyn FnMut(*const GcHeader)) {}
}

/// Resolved settings for one demo run
#[derive(Debug, Clone)]
pub struct DemoSettings {
    pub instances: usize,
    pub derived: usize,
    pub garbage: usize,
    pub limit: Limit,
    pub collect_first: bool,
    pub gc_thread: bool,
}

impl DemoSettings {
    pub fn from_config(demo: &DemoSection) -> Self {
        Self {
            instances: demo.instances,
            derived: demo.derived,
            garbage: demo.garbage,
            limit: demo.limit.into(),
            collect_first: demo.collect_first,
            gc_thread: false,
        }
    }
}

/// Rooted demo objects on a fresh heap
pub struct Population {
    heap: Heap,
    noise: ClassId,
    _apps: Vec<Handle>,
    _derived_apps: Vec<Handle>,
    created: Vec<i64>,
}

impl Population {
    pub fn build(heap: Heap, settings: &DemoSettings) -> Result<Self> {
        let app = heap.define_class::<App>(LoaderId::BOOTSTRAP, APP, None)?;
        let derived = heap.define_class::<DerivedApp>(LoaderId::BOOTSTRAP, DERIVED_APP, Some(app))?;
        let noise = heap.define_class::<String>(LoaderId::BOOTSTRAP, NOISE, None)?;

        let created: Vec<i64> = (0..settings.instances as i64).collect();
        let apps = created
            .iter()
            .map(|&value| heap.alloc(app, App { value }))
            .collect::<Result<Vec<_>, _>>()?;
        let derived_apps = (0..settings.derived)
            .map(|i| {
                heap.alloc(
                    derived,
                    DerivedApp {
                        base: App { value: -1 - i as i64 },
                        label: format!("derived-{i}"),
                    },
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        for i in 0..settings.garbage {
            let value = (settings.instances + i) as i64;
            drop(heap.alloc(app, App { value })?);
        }
        debug!(
            instances = settings.instances,
            derived = settings.derived,
            garbage = settings.garbage,
            "demo population ready"
        );

        Ok(Self {
            heap,
            noise,
            _apps: apps,
            _derived_apps: derived_apps,
            created,
        })
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }
}

/// What `demo` found
#[derive(Debug)]
pub struct DemoReport {
    pub created: Vec<i64>,
    pub found: Vec<i64>,
    pub limit: Limit,
    pub collections: usize,
}

impl DemoReport {
    /// All created instances when unbounded, otherwise `limit` of them, with
    /// no garbage and no subclass instances.
    pub fn is_consistent(&self) -> bool {
        let expected = self
            .limit
            .get()
            .map_or(self.created.len(), |limit| limit.min(self.created.len()));
        self.found.len() == expected
            && self.found.windows(2).all(|w| w[0] < w[1])
            && self.found.iter().all(|v| self.created.binary_search(v).is_ok())
    }
}

pub fn run_demo(config: HeapConfig, settings: &DemoSettings) -> Result<DemoReport> {
    let population = Population::build(Heap::with_config(config), settings)?;
    let heap = population.heap();
    let descriptor = TypeDescriptor::bootstrap(APP);
    let query = InstanceQuery::new(&descriptor)
        .limit(settings.limit)
        .options(EnumerationOptions {
            collect_first: settings.collect_first,
            ..EnumerationOptions::default()
        });

    let handles = if settings.gc_thread {
        with_collector(heap, population.noise, || query.run(heap))??
    } else {
        query.run(heap)?
    };

    let mut found = handles
        .iter()
        .map(|handle| {
            handle
                .downcast_ref::<App>()
                .map(|app| app.value)
                .ok_or_else(|| anyhow!("{handle:?} is not an App"))
        })
        .collect::<Result<Vec<_>>>()?;
    found.sort_unstable();

    Ok(DemoReport {
        created: population.created.clone(),
        found,
        limit: settings.limit,
        collections: heap.stats().collections,
    })
}

/// Run `work` while another thread allocates garbage and collects.
fn with_collector<T>(heap: &Heap, noise: ClassId, work: impl FnOnce() -> T) -> Result<T> {
    let done = AtomicBool::new(false);
    thread::scope(|scope| {
        let collector_heap = heap.clone();
        let done_flag = &done;
        let collector = scope.spawn(move || -> Result<usize> {
            let mut rounds = 0;
            loop {
                for i in 0..NOISE_PER_ROUND {
                    drop(collector_heap.alloc(noise, format!("noise-{rounds}-{i}"))?);
                }
                collector_heap.collect()?;
                rounds += 1;
                if done_flag.load(Ordering::Acquire) {
                    return Ok(rounds);
                }
            }
        });

        let result = work();
        done.store(true, Ordering::Release);
        let rounds = collector
            .join()
            .map_err(|_| anyhow!("collector thread panicked"))??;
        info!(rounds, "background collector stopped");
        Ok(result)
    })
}

/// Live instances of one class
#[derive(Debug)]
pub struct CensusRow {
    pub class: String,
    pub loader: String,
    pub live: usize,
}

pub fn run_census(config: HeapConfig, settings: &DemoSettings) -> Result<Vec<CensusRow>> {
    let population = Population::build(Heap::with_config(config), settings)?;
    let heap = population.heap();
    if settings.collect_first {
        heap.collect()?;
    }

    heap.classes()
        .into_iter()
        .filter(|info| info.loaded)
        .map(|info| {
            let live = count_instances(heap, &TypeDescriptor::Class(info.id))?;
            Ok(CensusRow {
                loader: heap.loader_name(info.loader).unwrap_or_else(|| info.loader.to_string()),
                class: info.name,
                live,
            })
        })
        .collect()
}
