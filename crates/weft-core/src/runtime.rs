//! Worker thread runtime: spawn, pin, join.
//!
//! One OS thread per worker spec. Each thread pins itself to its declared
//! core before invoking the run closure; pinning is best-effort off Linux
//! and Windows. Re-launching after a join is permitted.

use std::sync::OnceLock;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Errors from launching or pinning worker threads.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker {name}: {message}")]
    SpawnFailed {
        /// Worker name from the spec.
        name: String,
        /// OS error message.
        message: String,
    },

    /// Launch was called while workers are still running.
    #[error("worker threads already running")]
    AlreadyRunning,

    /// The affinity syscall failed for the given core.
    #[error("failed to pin thread to core {core}: {message}")]
    AffinityFailed {
        /// Requested core.
        core: u32,
        /// OS error message.
        message: String,
    },
}

/// One worker to launch: thread name, CPU core, and the run closure.
pub struct WorkerSpec {
    /// Thread name, also used in diagnostics.
    pub name: String,
    /// CPU core the thread pins itself to.
    pub core: u32,
    /// The worker body; runs on the pinned thread until it returns.
    pub run: Box<dyn FnOnce() + Send>,
}

impl std::fmt::Debug for WorkerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSpec")
            .field("name", &self.name)
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

/// Spawns and joins the pinned worker threads of one engine.
#[derive(Default)]
pub struct ThreadRuntime {
    threads: Vec<JoinHandle<()>>,
}

impl ThreadRuntime {
    /// Creates an empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns one named thread per worker spec.
    ///
    /// Each thread pins itself to its declared core (best-effort; a failed
    /// pin is logged, not fatal) and then invokes the run closure.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if workers from a previous launch have not
    /// been joined, or `SpawnFailed` if the OS refuses a thread. On a
    /// failed spawn the already-spawned workers keep running; the caller
    /// decides whether to signal them and [`join`](Self::join).
    pub fn launch(&mut self, workers: Vec<WorkerSpec>) -> Result<(), RuntimeError> {
        if !self.threads.is_empty() {
            return Err(RuntimeError::AlreadyRunning);
        }

        for spec in workers {
            let name = spec.name.clone();
            let handle = thread::Builder::new()
                .name(spec.name.clone())
                .spawn(move || {
                    if let Err(error) = pin_current_thread(spec.core) {
                        tracing::warn!("worker {}: {error}", spec.name);
                    }
                    (spec.run)();
                })
                .map_err(|e| RuntimeError::SpawnFailed {
                    name,
                    message: e.to_string(),
                })?;
            self.threads.push(handle);
        }

        Ok(())
    }

    /// Joins all spawned threads. Idempotent; a later `launch` is allowed.
    pub fn join(&mut self) {
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
    }

    /// Number of threads spawned and not yet joined.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }
}

impl Drop for ThreadRuntime {
    fn drop(&mut self) {
        self.join();
    }
}

impl std::fmt::Debug for ThreadRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRuntime")
            .field("thread_count", &self.threads.len())
            .finish()
    }
}

/// Pins the calling thread to `core`.
///
/// # Errors
///
/// Returns `AffinityFailed` when the platform affinity call fails. On
/// platforms without an affinity API this is a successful no-op.
pub fn pin_current_thread(core: u32) -> Result<(), RuntimeError> {
    #[cfg(target_os = "linux")]
    {
        use std::mem;

        // SAFETY: the cpu_set_t is zero-initialized and CPU_ZERO/CPU_SET
        // only write inside it; pid 0 targets the calling thread.
        #[allow(unsafe_code)]
        unsafe {
            let mut set: libc::cpu_set_t = mem::zeroed();
            libc::CPU_ZERO(&mut set);
            libc::CPU_SET(core as usize, &mut set);

            let result = libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &raw const set);
            if result != 0 {
                return Err(RuntimeError::AffinityFailed {
                    core,
                    message: std::io::Error::last_os_error().to_string(),
                });
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        use winapi::shared::basetsd::DWORD_PTR;
        use winapi::um::processthreadsapi::GetCurrentThread;
        use winapi::um::winbase::SetThreadAffinityMask;

        // SAFETY: GetCurrentThread returns a pseudo-handle that needs no
        // close; the mask selects a single valid bit.
        #[allow(unsafe_code)]
        unsafe {
            let mask: DWORD_PTR = 1 << core;
            if SetThreadAffinityMask(GetCurrentThread(), mask) == 0 {
                return Err(RuntimeError::AffinityFailed {
                    core,
                    message: std::io::Error::last_os_error().to_string(),
                });
            }
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        let _ = core;
    }

    Ok(())
}

/// CPU relax hint for spin loops. Never parks the thread.
#[inline]
pub fn relax_cpu() {
    std::hint::spin_loop();
}

/// Monotonic nanoseconds since process start.
#[must_use]
pub fn monotonic_ns() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    // Nanoseconds since first call fit u64 for ~580 years.
    #[allow(clippy::cast_possible_truncation)]
    {
        start.elapsed().as_nanos() as u64
    }
}
