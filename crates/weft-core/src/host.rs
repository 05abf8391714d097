//! Process host: lifecycle driver with signal-based stop.
//!
//! A [`Host`] drives a runtime through build → start, installs
//! SIGINT/SIGTERM handlers that flip its stop flag, and tears everything
//! down in order. Only one host may own the process signal handlers at a
//! time; a second installation attempt is an error, not a silent
//! re-registration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Host construction options.
#[derive(Debug, Clone)]
pub struct HostOptions {
    /// Whether to install SIGINT/SIGTERM handlers on start.
    pub install_signal_handlers: bool,
    /// Poll interval of the wait helpers.
    pub wait_interval: Duration,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            install_signal_handlers: true,
            wait_interval: Duration::from_millis(20),
        }
    }
}

/// Setup/teardown hooks around a hosted run, e.g. a logging sink.
///
/// Teardown runs exactly once, and only if setup ran.
#[derive(Default)]
pub struct HostHooks {
    /// Runs before the runtime builds.
    pub setup: Option<Box<dyn FnOnce()>>,
    /// Runs after the runtime is stopped and joined.
    pub teardown: Option<Box<dyn FnOnce()>>,
}

impl std::fmt::Debug for HostHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHooks")
            .field("setup", &self.setup.is_some())
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}

/// The lifecycle seam a host drives.
pub trait Hosted {
    /// Error type of the runtime's fallible transitions.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Validates and materializes; must be idempotent.
    fn build(&mut self) -> Result<(), Self::Error>;
    /// Launches workers; must be idempotent.
    fn start(&mut self) -> Result<(), Self::Error>;
    /// Requests cooperative shutdown.
    fn stop(&self);
    /// Joins workers.
    fn join(&mut self);
}

/// Host errors.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Another live host already owns the process signal handlers.
    #[error("signal handlers already owned by another host")]
    SignalHandlersOwned,

    /// Registering a signal handler failed.
    #[error("failed to install signal handlers: {0}")]
    SignalInstall(std::io::Error),

    /// The hosted runtime failed to build.
    #[error("runtime build failed: {0}")]
    Build(Box<dyn std::error::Error + Send + Sync>),

    /// The hosted runtime failed to start.
    #[error("runtime start failed: {0}")]
    Start(Box<dyn std::error::Error + Send + Sync>),
}

/// Claim marker: set while some host owns the process signal handlers.
static SIGNAL_OWNER: AtomicBool = AtomicBool::new(false);

/// Drives a [`Hosted`] runtime and owns the stop request flag.
pub struct Host {
    options: HostOptions,
    stop_requested: Arc<AtomicBool>,
    started: bool,
    setup_done: bool,
    teardown: Option<Box<dyn FnOnce()>>,
    signals_claimed: bool,
    #[cfg(unix)]
    signal_ids: Vec<signal_hook::SigId>,
}

impl Host {
    /// Creates a host with the given options.
    #[must_use]
    pub fn new(options: HostOptions) -> Self {
        Self {
            options,
            stop_requested: Arc::new(AtomicBool::new(false)),
            started: false,
            setup_done: false,
            teardown: None,
            signals_claimed: false,
            #[cfg(unix)]
            signal_ids: Vec::new(),
        }
    }

    /// Runs setup, builds and starts the runtime, installs signal
    /// handlers. Idempotent once started.
    ///
    /// # Errors
    ///
    /// Build/start failures from the runtime (teardown still runs), or
    /// signal installation failures (the runtime is stopped and joined
    /// first).
    pub fn start<R: Hosted>(&mut self, runtime: &mut R, hooks: HostHooks) -> Result<(), HostError> {
        if self.started {
            return Ok(());
        }

        self.stop_requested.store(false, Ordering::Release);

        if let Some(setup) = hooks.setup {
            setup();
            self.setup_done = true;
        } else {
            self.setup_done = false;
        }
        self.teardown = hooks.teardown;

        if let Err(error) = runtime.build() {
            self.run_teardown();
            return Err(HostError::Build(Box::new(error)));
        }

        if let Err(error) = runtime.start() {
            self.run_teardown();
            return Err(HostError::Start(Box::new(error)));
        }

        if let Err(error) = self.install_signal_handlers() {
            runtime.stop();
            runtime.join();
            self.run_teardown();
            return Err(error);
        }

        self.started = true;
        Ok(())
    }

    /// Stops the runtime, joins it, releases signal handlers, and runs
    /// teardown.
    pub fn stop<R: Hosted>(&mut self, runtime: &mut R) {
        self.request_stop();
        runtime.stop();
        runtime.join();
        self.uninstall_signal_handlers();
        self.run_teardown();
        self.started = false;
    }

    /// Flips the stop flag; also done by the signal handlers.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested (by a call or a signal).
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Sleeps in `wait_interval` steps until a stop is requested.
    pub fn wait_for_stop(&self) {
        while !self.stop_requested() {
            std::thread::sleep(self.options.wait_interval);
        }
    }

    /// Sleeps until `duration` elapses or a stop is requested, whichever
    /// comes first.
    pub fn wait_for(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.stop_requested() && Instant::now() < deadline {
            std::thread::sleep(self.options.wait_interval);
        }
    }

    fn install_signal_handlers(&mut self) -> Result<(), HostError> {
        if !self.options.install_signal_handlers {
            return Ok(());
        }

        if SIGNAL_OWNER
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(HostError::SignalHandlersOwned);
        }
        self.signals_claimed = true;

        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGINT, SIGTERM};

            for signal in [SIGINT, SIGTERM] {
                match signal_hook::flag::register(signal, Arc::clone(&self.stop_requested)) {
                    Ok(id) => self.signal_ids.push(id),
                    Err(error) => {
                        self.uninstall_signal_handlers();
                        return Err(HostError::SignalInstall(error));
                    }
                }
            }
        }

        Ok(())
    }

    fn uninstall_signal_handlers(&mut self) {
        #[cfg(unix)]
        for id in self.signal_ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }

        if self.signals_claimed {
            SIGNAL_OWNER.store(false, Ordering::Release);
            self.signals_claimed = false;
        }
    }

    fn run_teardown(&mut self) {
        let teardown = self.teardown.take();
        if !self.setup_done {
            return;
        }
        self.setup_done = false;
        if let Some(teardown) = teardown {
            teardown();
        }
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.uninstall_signal_handlers();
        self.run_teardown();
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("started", &self.started)
            .field("stop_requested", &self.stop_requested())
            .finish_non_exhaustive()
    }
}
