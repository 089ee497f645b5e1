//! Update kernel dispatcher
//!
//! One tick is snapshot, evaluate, write back:
//!
//! 1. Every entity with a live kernel is copied out of the scene in creation
//!    order, so no kernel can observe another entity's half-updated state.
//! 2. Entities are grouped by kernel. Each group is evaluated scalar or
//!    batched, with batched groups split into chunks, and the jobs are fed to
//!    worker threads that live as long as the dispatcher.
//! 3. Every job's result is collected, then results are written back in
//!    snapshot order. A result holding NaN or infinity is discarded, its
//!    entity frozen and a [`KernelFault`] reported.

use super::{DispatchMode, KernelContext, KernelFault, KernelId, KernelRegistry, KernelState, StateBatch, UpdateKernel};
use crate::config::DispatchSettings;
use crate::foundation::math::Vec3;
use crate::scene::{EntityId, SceneGraph};
use crossbeam::channel::{self, Sender};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

type Snapshot = Arc<Vec<(EntityId, KernelId, KernelState)>>;

/// Outcome of one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// 1-based tick index
    pub tick: u64,
    /// Entities whose kernel ran
    pub evaluated: usize,
    /// Kernel groups evaluated per entity
    pub scalar_groups: usize,
    /// Kernel groups evaluated through `evaluate_batch`
    pub batched_groups: usize,
    /// Entities frozen this tick
    pub faults: Vec<KernelFault>,
}

/// A unit of work handed to a worker
struct Job {
    kernel: Arc<dyn UpdateKernel>,
    batched: bool,
    /// Positions into the snapshot
    members: Vec<usize>,
}

/// Evaluates kernels over the scene once per tick
#[derive(Debug)]
pub struct Dispatcher {
    mode: DispatchMode,
    batch_threshold: usize,
    workers: usize,
    pool: Option<WorkerPool>,
    gravity: Vec3,
    ground_height: f32,
    tick: u64,
    elapsed: f64,
}

impl Dispatcher {
    /// Create from configured settings
    ///
    /// More than one worker starts a thread pool that is reused by every tick.
    pub fn new(settings: &DispatchSettings) -> Self {
        let workers = match settings.worker_threads {
            0 => thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            n => n,
        };
        let pool = (workers > 1).then(|| WorkerPool::new(workers));
        Self {
            mode: settings.mode,
            batch_threshold: settings.batch_threshold.max(1),
            workers,
            pool,
            gravity: Vec3::new(0.0, -9.81, 0.0),
            ground_height: 0.0,
            tick: 0,
            elapsed: 0.0,
        }
    }

    /// Set the environment fed to kernels through [`KernelContext`]
    pub fn set_environment(&mut self, gravity: Vec3, ground_height: f32) {
        self.gravity = gravity;
        self.ground_height = ground_height;
    }

    /// Switch dispatch mode
    pub fn set_mode(&mut self, mode: DispatchMode) {
        self.mode = mode;
    }

    /// Current dispatch mode
    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Ticks run so far
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Simulated seconds so far
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Advance every kernel-driven entity by `dt`
    pub fn tick(&mut self, scene: &mut SceneGraph, registry: &KernelRegistry, dt: f32) -> TickReport {
        self.tick += 1;
        let ctx = KernelContext {
            dt,
            tick: self.tick,
            elapsed: self.elapsed,
            gravity: self.gravity,
            ground_height: self.ground_height,
        };

        let snapshot: Snapshot = Arc::new(scene.kernel_snapshot());
        let mut report = TickReport {
            tick: self.tick,
            ..Default::default()
        };

        let mut groups: BTreeMap<KernelId, Vec<usize>> = BTreeMap::new();
        for (index, (_, kernel, _)) in snapshot.iter().enumerate() {
            groups.entry(*kernel).or_default().push(index);
        }

        let mut jobs = Vec::new();
        for (kernel_id, members) in groups {
            let Some(kernel) = registry.shared(kernel_id) else {
                log::warn!("Kernel {:?} vanished from the registry; {} entities skipped", kernel_id, members.len());
                continue;
            };

            let batched = match self.mode {
                DispatchMode::Scalar => false,
                DispatchMode::Batched => true,
                DispatchMode::Auto => members.len() >= self.batch_threshold,
            };

            if batched {
                report.batched_groups += 1;
                let chunk = ((members.len() + self.workers - 1) / self.workers).max(self.batch_threshold);
                jobs.extend(members.chunks(chunk).map(|members| Job {
                    kernel: Arc::clone(&kernel),
                    batched,
                    members: members.to_vec(),
                }));
            } else {
                report.scalar_groups += 1;
                jobs.push(Job { kernel, batched, members });
            }
        }

        let results = self.run_jobs(jobs, &snapshot, ctx);

        for (index, next) in results.into_iter().enumerate() {
            let Some(next) = next else { continue };
            let (entity, kernel_id, _) = snapshot[index];
            report.evaluated += 1;

            match next.first_non_finite() {
                None => scene.apply_kernel_state(entity, &next),
                Some(field) => {
                    scene.mark_kernel_faulted(entity);
                    let fault = KernelFault {
                        entity,
                        kernel: registry.name(kernel_id).unwrap_or("<unknown>").to_string(),
                        tick: self.tick,
                        field,
                    };
                    log::warn!("{}; entity frozen", fault);
                    report.faults.push(fault);
                }
            }
        }

        self.elapsed += f64::from(dt);
        log::trace!(
            "Tick {}: {} entities, {} scalar / {} batched groups, {} faults",
            report.tick,
            report.evaluated,
            report.scalar_groups,
            report.batched_groups,
            report.faults.len()
        );
        report
    }

    /// Evaluate every job, returning results indexed like the snapshot
    ///
    /// A panicking kernel is re-raised on the calling thread once its job
    /// reports back.
    fn run_jobs(&self, jobs: Vec<Job>, snapshot: &Snapshot, ctx: KernelContext) -> Vec<Option<KernelState>> {
        let mut results = vec![None; snapshot.len()];

        let pool = match &self.pool {
            Some(pool) if jobs.len() > 1 => pool,
            _ => {
                for (index, state) in jobs.iter().flat_map(|job| evaluate(job, snapshot, &ctx)) {
                    results[index] = Some(state);
                }
                return results;
            }
        };

        let count = jobs.len();
        let (done, outputs) = channel::bounded(count);
        for job in jobs {
            let snapshot = Arc::clone(snapshot);
            let done = done.clone();
            pool.execute(Box::new(move || {
                let output = panic::catch_unwind(AssertUnwindSafe(|| evaluate(&job, &snapshot, &ctx)));
                // Capacity covers every job, so this never blocks
                let _ = done.send(output);
            }));
        }
        drop(done);

        for output in outputs.iter().take(count) {
            match output {
                Ok(states) => {
                    for (index, state) in states {
                        results[index] = Some(state);
                    }
                }
                Err(payload) => panic::resume_unwind(payload),
            }
        }
        results
    }
}

fn evaluate(job: &Job, snapshot: &[(EntityId, KernelId, KernelState)], ctx: &KernelContext) -> Vec<(usize, KernelState)> {
    if job.batched {
        let states: Vec<KernelState> = job.members.iter().map(|&i| snapshot[i].2).collect();
        let mut batch = StateBatch::from_states(&states);
        job.kernel.evaluate_batch(&mut batch, ctx);
        job.members.iter().copied().zip(batch.into_states()).collect()
    } else {
        job.members
            .iter()
            .map(|&i| (i, job.kernel.evaluate_scalar(&snapshot[i].2, ctx)))
            .collect()
    }
}

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Kernel worker threads fed through a shared channel
#[derive(Debug)]
struct WorkerPool {
    sender: Option<Sender<Task>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    fn new(size: usize) -> Self {
        let (sender, receiver) = channel::unbounded::<Task>();
        let workers = (0..size)
            .filter_map(|id| {
                let receiver = receiver.clone();
                let spawned = thread::Builder::new()
                    .name(format!("kernel-worker-{}", id))
                    .spawn(move || {
                        for task in receiver.iter() {
                            task();
                        }
                    });
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(err) => {
                        log::warn!("Kernel worker {} not started: {}", id, err);
                        None
                    }
                }
            })
            .collect::<Vec<_>>();
        log::debug!("Started {} kernel workers", workers.len());
        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Queue a task, running it here if no worker is left to take it
    fn execute(&self, task: Task) {
        match &self.sender {
            Some(sender) if !self.workers.is_empty() => {
                if let Err(err) = sender.send(task) {
                    (err.into_inner())();
                }
            }
            _ => task(),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel ends each worker's loop
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::warn!("Kernel worker exited with a panic");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Transform;
    use crate::kernels::LinearMotion;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn settings(mode: DispatchMode, worker_threads: usize) -> DispatchSettings {
        DispatchSettings {
            mode,
            batch_threshold: 4,
            worker_threads,
        }
    }

    fn moving_scene(registry: &KernelRegistry, count: usize) -> SceneGraph {
        let mut scene = SceneGraph::new();
        let kernel = registry.lookup(LinearMotion::NAME).unwrap();
        for i in 0..count {
            let e = scene.create_entity(None).unwrap();
            scene.attach_kernel(e, kernel, registry).unwrap();
            scene.kernel_mut(e).unwrap().velocity = Vec3::new(1.0, i as f32, 0.0);
        }
        scene
    }

    #[test]
    fn test_auto_mode_groups() {
        let registry = KernelRegistry::with_builtins();
        let mut scene = moving_scene(&registry, 10);
        let e = scene.create_entity(None).unwrap();
        scene.attach_kernel(e, registry.lookup("spin").unwrap(), &registry).unwrap();

        let mut dispatcher = Dispatcher::new(&settings(DispatchMode::Auto, 2));
        let report = dispatcher.tick(&mut scene, &registry, 0.5);
        assert_eq!(report.tick, 1);
        assert_eq!(report.evaluated, 11);
        assert_eq!(report.batched_groups, 1);
        assert_eq!(report.scalar_groups, 1);
        assert!(report.faults.is_empty());

        let first = scene.iter().next().unwrap();
        assert_eq!(scene.transform(first).unwrap().position, Vec3::new(0.5, 0.0, 0.0));

        dispatcher.set_mode(DispatchMode::Scalar);
        assert_eq!(dispatcher.mode(), DispatchMode::Scalar);
        let report = dispatcher.tick(&mut scene, &registry, 0.5);
        assert_eq!(report.batched_groups, 0);
        assert_eq!(report.scalar_groups, 2);
    }

    #[test]
    fn test_modes_and_thread_counts_agree() {
        let registry = KernelRegistry::with_builtins();
        let run = |mode, workers| {
            let mut scene = moving_scene(&registry, 37);
            let mut dispatcher = Dispatcher::new(&settings(mode, workers));
            for _ in 0..20 {
                dispatcher.tick(&mut scene, &registry, 0.016);
            }
            scene.iter().map(|e| scene.transform(e).unwrap()).collect::<Vec<Transform>>()
        };

        let reference = run(DispatchMode::Scalar, 1);
        assert_eq!(run(DispatchMode::Batched, 1), reference);
        assert_eq!(run(DispatchMode::Batched, 4), reference);
        assert_eq!(run(DispatchMode::Auto, 3), reference);
    }

    /// Records which threads evaluated it
    struct ThreadRecorder {
        seen: Arc<Mutex<HashSet<thread::ThreadId>>>,
    }

    impl UpdateKernel for ThreadRecorder {
        fn name(&self) -> &str {
            "thread_recorder"
        }

        fn evaluate_scalar(&self, state: &KernelState, _ctx: &KernelContext) -> KernelState {
            self.seen.lock().unwrap().insert(thread::current().id());
            *state
        }
    }

    #[test]
    fn test_workers_are_reused_across_ticks() {
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let mut registry = KernelRegistry::with_builtins();
        let recorder = registry.register(ThreadRecorder { seen: Arc::clone(&seen) });
        let mut scene = SceneGraph::new();
        for _ in 0..16 {
            let e = scene.create_entity(None).unwrap();
            scene.attach_kernel(e, recorder, &registry).unwrap();
        }

        let mut dispatcher = Dispatcher::new(&settings(DispatchMode::Batched, 2));
        for _ in 0..25 {
            let report = dispatcher.tick(&mut scene, &registry, 0.016);
            assert_eq!(report.evaluated, 16);
        }
        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.len() <= 2, "{} distinct threads", seen.len());
        assert!(!seen.contains(&thread::current().id()));
    }

    #[test]
    fn test_elapsed_accumulates() {
        let registry = KernelRegistry::with_builtins();
        let mut scene = SceneGraph::new();
        let mut dispatcher = Dispatcher::new(&settings(DispatchMode::Auto, 1));
        dispatcher.tick(&mut scene, &registry, 0.25);
        dispatcher.tick(&mut scene, &registry, 0.25);
        assert_eq!(dispatcher.tick_count(), 2);
        assert_eq!(dispatcher.elapsed(), 0.5);
    }
}
