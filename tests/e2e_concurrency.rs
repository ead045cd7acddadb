//! End-to-end tests for concurrent composition.
//!
//! Many threads attach the same view type at once; the code generator and
//! type loader must each run exactly once per (host type, view type).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use trait_weave::{
    AccessorTable, CodeGenerator, Collaborators, Composer, ComposerConfig, Error, ExecutableTypeSpec,
    FieldMask, FieldType, HostTypeDefinition, InProcessLoader, LoadedType, Result,
    SlotTableGenerator, StorageMode, TypeLoader, Value, ViewTypeDefinition,
};

const THREADS: usize = 16;

// ============================================================================
// Counting collaborators
// ============================================================================

struct CountingGenerator {
    inner: SlotTableGenerator,
    calls: AtomicUsize,
}

impl CodeGenerator for CountingGenerator {
    fn synthesize(
        &self,
        view: &ViewTypeDefinition,
        host: &HostTypeDefinition,
        mask: &FieldMask,
    ) -> Result<ExecutableTypeSpec> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // widen the race window
        thread::sleep(Duration::from_millis(20));
        self.inner.synthesize(view, host, mask)
    }

    fn synthesize_wrapper(&self, core: &HostTypeDefinition) -> Result<ExecutableTypeSpec> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.synthesize_wrapper(core)
    }
}

#[derive(Default)]
struct CountingLoader {
    inner: InProcessLoader,
    calls: AtomicUsize,
}

impl TypeLoader for CountingLoader {
    fn load(&self, spec: ExecutableTypeSpec) -> Result<LoadedType> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.load(spec)
    }
}

/// Fails its first synthesis and records how many builds overlap.
struct FlakyGenerator {
    inner: SlotTableGenerator,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl CodeGenerator for FlakyGenerator {
    fn synthesize(
        &self,
        view: &ViewTypeDefinition,
        host: &HostTypeDefinition,
        mask: &FieldMask,
    ) -> Result<ExecutableTypeSpec> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if call == 0 {
            return Err(Error::CodeGen("compiler unavailable".into()));
        }
        self.inner.synthesize(view, host, mask)
    }

    fn synthesize_wrapper(&self, core: &HostTypeDefinition) -> Result<ExecutableTypeSpec> {
        self.inner.synthesize_wrapper(core)
    }
}

impl FlakyGenerator {
    fn new() -> Self {
        Self {
            inner: SlotTableGenerator::new(StorageMode::Eav),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

#[derive(Default)]
struct Person {
    age: i64,
}

fn composer_with(generator: Arc<dyn CodeGenerator>, loader: Arc<dyn TypeLoader>) -> Arc<Composer> {
    let accessors = Arc::new(AccessorTable::new());
    accessors
        .describe::<Person>("Person")
        .field("age", FieldType::Int, |p| Value::from(p.age), |p, v| {
            p.age = v.try_into()?;
            Ok(())
        })
        .finish();

    let collab = Collaborators::in_process(accessors.clone())
        .with_generator(StorageMode::Eav, generator)
        .with_loader(loader);

    let composer = Composer::new(ComposerConfig::default(), collab);
    composer
        .declare_host(accessors.host_definition("Person").unwrap().composable())
        .unwrap();
    composer
        .declare_view(ViewTypeDefinition::new("Student")
            .with_field("age", FieldType::Int)
            .with_field("school", FieldType::String))
        .unwrap();
    Arc::new(composer)
}

fn setup() -> (Arc<Composer>, Arc<CountingGenerator>, Arc<CountingLoader>) {
    let generator = Arc::new(CountingGenerator {
        inner: SlotTableGenerator::new(StorageMode::Eav),
        calls: AtomicUsize::new(0),
    });
    let loader = Arc::new(CountingLoader::default());
    (composer_with(generator.clone(), loader.clone()), generator, loader)
}

// ============================================================================
// 1. One build under contention (std threads)
// ============================================================================

#[test]
fn test_concurrent_attach_builds_once() {
    let (composer, generator, loader) = setup();
    let barrier = Barrier::new(THREADS);

    let views: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let composer = &composer;
                let barrier = &barrier;
                s.spawn(move || {
                    let host = composer.new_host("Person", Person { age: i as i64 }).unwrap();
                    barrier.wait();
                    let view = composer.attach_view(&host, "Student", false).unwrap();
                    (host, view)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    assert_eq!(composer.cache().len(), 1);

    let class = views[0].1.loaded_type().clone();
    for (i, (host, view)) in views.iter().enumerate() {
        assert!(Arc::ptr_eq(view.loaded_type(), &class));
        assert_eq!(view.get("age").unwrap(), Value::Int(i as i64));
        assert_eq!(view.instance_id(), host.id());
    }
}

#[test]
fn test_concurrent_attach_same_host_shares_handle() {
    let (composer, _, _) = setup();
    let host = composer.new_host("Person", Person { age: 7 }).unwrap();
    let barrier = Barrier::new(THREADS);

    let views: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    composer.attach_view(&host, "Student", false).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(views.iter().all(|v| Arc::ptr_eq(v, &views[0])));
    assert_eq!(host.views().len(), 1);
}

// ============================================================================
// 2. One build under contention (tokio multi-thread runtime)
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_attach_from_tasks() {
    let (composer, generator, loader) = setup();

    let tasks: Vec<_> = (0..THREADS)
        .map(|i| {
            let composer = composer.clone();
            tokio::task::spawn_blocking(move || {
                let host = composer.new_host("Person", Person { age: i as i64 }).unwrap();
                let view = composer.attach_view(&host, "Student", false).unwrap();
                view.set("school", Value::from(format!("school-{i}"))).unwrap();
                (host, view)
            })
        })
        .collect();

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }

    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);

    // EAV rows stay per instance
    for (i, (_, view)) in results.iter().enumerate() {
        assert_eq!(view.get("school").unwrap(), Value::from(format!("school-{i}")));
    }
    assert_eq!(composer.triple_store().instance_count(), THREADS);
}

// ============================================================================
// 3. A failed build is retried by one waiter at a time
// ============================================================================

#[test]
fn test_failed_build_is_not_rebuilt_in_parallel() {
    let generator = Arc::new(FlakyGenerator::new());
    let composer = composer_with(generator.clone(), Arc::new(InProcessLoader::new()));
    let barrier = Barrier::new(8);

    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let composer = &composer;
                let barrier = &barrier;
                s.spawn(move || {
                    let host = composer.new_host("Person", Person { age: i }).unwrap();
                    barrier.wait();
                    if i >= 4 {
                        // arrive while the retry is running
                        thread::sleep(Duration::from_millis(60));
                    }
                    composer.attach_view(&host, "Student", false).map(|_| ())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(generator.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
    assert_eq!(composer.cache().len(), 1);
}
