//! Runs named long-lived processes under one cancellation token and shuts them
//! down together.
//!
//! - processes run concurrently until one fails or SIGINT/SIGTERM arrives
//! - closers run afterwards, bounded by a timeout, whatever the outcome
//! - `run` reports the outcome as a process exit code
//!
//! # Example
//!
//! ```no_run
//! use router_manager_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let runner = Runner::new()
//!         .with_app_process("heartbeat", |ctx| async move {
//!             ctx.cancelled().await;
//!             Ok(())
//!         })
//!         .with_closer("pool", || async move { Ok(()) })
//!         .with_closer_timeout(Duration::from_secs(5));
//!
//!     std::process::exit(runner.run().await);
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type BoxedResultFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A long-lived process. Receives the shared cancellation token.
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxedResultFuture + Send>;

/// A cleanup step run once every process has stopped.
pub type Closer = Box<dyn FnOnce() -> BoxedResultFuture + Send>;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

pub struct Runner {
    app_processes: Vec<(String, AppProcess)>,
    closers: Vec<(String, Closer)>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// A runner with no processes and a 10 second closer timeout
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Add a process. An error from any process cancels all of them.
    pub fn with_app_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: AppProcess = Box::new(move |token| -> BoxedResultFuture {
            Box::pin(process(token))
        });
        self.app_processes.push((name.into(), boxed));
        self
    }

    /// Add a closer. Every closer runs even if another one fails.
    pub fn with_closer<F, Fut>(mut self, name: impl Into<String>, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: Closer = Box::new(move || -> BoxedResultFuture { Box::pin(closer()) });
        self.closers.push((name.into(), boxed));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Use an externally owned token, e.g. to stop the runner from a test
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Run until every process has stopped, then run the closers.
    ///
    /// Returns `EXIT_FAILURE` if a process failed or panicked, else `EXIT_OK`.
    pub async fn run(self) -> i32 {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for (name, process) in self.app_processes {
            let process_token = token.clone();
            join_set.spawn(async move {
                let result = process(process_token).await;
                (name, result)
            });
        }

        spawn_signal_handlers(token.clone());

        let mut failed = false;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    debug!(process = %name, "App process completed");
                }
                Ok((name, Err(err))) => {
                    if !token.is_cancelled() {
                        error!(process = %name, "App process error: {:#}", err);
                        failed = true;
                        token.cancel();
                    } else {
                        debug!(process = %name, "App process stopped with error after cancellation: {:#}", err);
                    }
                }
                Err(err) => {
                    error!("App process panicked: {}", err);
                    failed = true;
                    token.cancel();
                }
            }

            if token.is_cancelled() {
                break;
            }
        }

        // Remaining processes observe the cancelled token; give them the chance to finish
        while let Some(joined) = join_set.join_next().await {
            if let Err(err) = joined {
                error!("App process panicked during shutdown: {}", err);
                failed = true;
            }
        }

        run_closers(self.closers, self.closer_timeout).await;

        if failed {
            error!("Application exiting with error");
            EXIT_FAILURE
        } else {
            info!("Application exiting normally");
            EXIT_OK
        }
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                ctrl_c_token.cancel();
            }
            Err(err) => error!("Error setting up signal handler: {}", err),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM signal");
                token.cancel();
            }
            Err(err) => error!("Error setting up SIGTERM handler: {}", err),
        }
    });
}

/// Run all closers concurrently, giving up after `timeout`
async fn run_closers(closers: Vec<(String, Closer)>, timeout: Duration) {
    if closers.is_empty() {
        return;
    }

    info!("Running closers with timeout of {:?}", timeout);

    let mut closer_set = JoinSet::new();
    for (name, closer) in closers {
        closer_set.spawn(async move { (name, closer().await) });
    }

    let drain = async {
        while let Some(joined) = closer_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => debug!(closer = %name, "Closer completed"),
                Ok((name, Err(err))) => error!(closer = %name, "Closer error: {:#}", err),
                Err(err) => error!("Closer panicked: {}", err),
            }
        }
    };

    match tokio::time::timeout(timeout, drain).await {
        Ok(()) => info!("All closers completed"),
        Err(_) => error!("Closers timed out after {:?}", timeout),
    }
}
