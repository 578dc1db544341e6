//! Secure Call Dispatcher - Serialized entry into the secure monitor
//!
//! # Purpose
//! The vendor secure monitor must only be entered from CPU 0 and never
//! concurrently. Callers on any thread marshal their request to one
//! dedicated worker that pins itself to the configured CPU, makes the
//! call, and hands the result registers back.
//!
//! # Integration Points
//! - Depends on: a [`SecureMonitor`] backend (the SMC instruction on
//!   target, a model on the host)
//! - Provides to: drivers needing secure-world services
//!
//! # Architecture
//! Bounded request queue (crossbeam) -> worker thread -> per-request reply
//! channel. Requests are served strictly in arrival order.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use serde::Deserialize;
use thiserror::Error;

pub mod smccc;

pub use smccc::{function_id, CallFlags, SmcArgs, SmcResult};

/// Dispatcher errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecureCallError {
    #[error("secure call {function_id:#x} timed out")]
    Timeout { function_id: u32 },

    #[error("secure call worker gone")]
    WorkerGone,

    #[error("secure call {function_id:#x} failed with status {code}")]
    Firmware { function_id: u32, code: i64 },

    #[error("secure call worker spawn failed: {0}")]
    Spawn(String),

    #[error("secure call worker could not be pinned to cpu {cpu}: {reason}")]
    Affinity { cpu: usize, reason: String },

    #[error("secure call config: {0}")]
    Config(String),
}

pub type Result<T> = core::result::Result<T, SecureCallError>;

/// Entry into the secure world
pub trait SecureMonitor: Send + 'static {
    /// Issue one call; blocks until the secure world returns
    fn call(&mut self, args: &SmcArgs) -> SmcResult;

    /// Bind the calling thread to `cpu`
    ///
    /// Runs on the worker before it serves anything. Backends with affinity
    /// control must enforce it here and fail if they cannot; the default
    /// accepts without pinning, for hosts and models where any CPU will do.
    fn pin_to_cpu(&mut self, cpu: usize) -> core::result::Result<(), String> {
        log::debug!("secure call: no affinity control, cpu {} not enforced", cpu);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
    /// CPU the worker runs on
    pub cpu: usize,
    /// Requests queued before callers block
    pub queue_depth: usize,
    /// Bound on queueing plus execution of one call
    pub call_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            cpu: 0,
            queue_depth: 16,
            call_timeout_ms: 1_000,
        }
    }
}

impl DispatcherConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SecureCallError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_depth == 0 {
            return Err(SecureCallError::Config("queue depth must be non-zero".into()));
        }
        if self.call_timeout_ms == 0 {
            return Err(SecureCallError::Config("call timeout must be non-zero".into()));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

struct Request {
    args: SmcArgs,
    reply: Sender<SmcResult>,
}

/// Handle to the secure call worker
pub struct Dispatcher {
    queue: Option<Sender<Request>>,
    worker: Option<JoinHandle<u64>>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Start the worker thread
    ///
    /// Returns once the worker has run [`SecureMonitor::pin_to_cpu`]. CPU
    /// placement is only as strict as the backend's pinning.
    ///
    /// # Errors
    /// - [`SecureCallError::Config`] for an invalid `config`
    /// - [`SecureCallError::Spawn`] if the thread could not be started
    /// - [`SecureCallError::Affinity`] if the backend refused to pin
    /// - [`SecureCallError::WorkerGone`] if pinning panicked
    pub fn spawn<S: SecureMonitor>(monitor: S, config: DispatcherConfig) -> Result<Self> {
        config.validate()?;

        let (queue, requests) = channel::bounded(config.queue_depth);
        let (ready, pinned) = channel::bounded(1);
        let cpu = config.cpu;
        let worker = thread::Builder::new()
            .name(format!("secure-call/cpu{}", cpu))
            .spawn(move || serve(monitor, cpu, ready, requests))
            .map_err(|e| SecureCallError::Spawn(e.to_string()))?;

        match pinned.recv() {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                let _ = worker.join();
                log::error!("secure call: pinning to cpu {} failed: {}", cpu, reason);
                return Err(SecureCallError::Affinity { cpu, reason });
            }
            Err(_) => {
                let _ = worker.join();
                return Err(SecureCallError::WorkerGone);
            }
        }

        log::info!("secure call: worker started on cpu {}", cpu);
        Ok(Self {
            queue: Some(queue),
            worker: Some(worker),
            config,
        })
    }

    /// Run `args` on the worker and wait for the result
    ///
    /// # Errors
    /// - [`SecureCallError::Timeout`] if queueing plus execution exceeds
    ///   the configured bound
    /// - [`SecureCallError::WorkerGone`] if the worker has exited
    /// - [`SecureCallError::Firmware`] for a negative status in `x0`
    pub fn call(&self, args: SmcArgs) -> Result<SmcResult> {
        let queue = self.queue.as_ref().ok_or(SecureCallError::WorkerGone)?;
        let function_id = args.function_id;
        let deadline = Instant::now() + self.config.call_timeout();

        let (reply, result) = channel::bounded(1);
        match queue.send_deadline(Request { args, reply }, deadline) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                log::warn!("secure call {:#x}: queue full", function_id);
                return Err(SecureCallError::Timeout { function_id });
            }
            Err(SendTimeoutError::Disconnected(_)) => return Err(SecureCallError::WorkerGone),
        }

        let result = match result.recv_deadline(deadline) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("secure call {:#x}: no reply", function_id);
                return Err(SecureCallError::Timeout { function_id });
            }
            Err(RecvTimeoutError::Disconnected) => return Err(SecureCallError::WorkerGone),
        };

        let code = result.status();
        if code < 0 {
            return Err(SecureCallError::Firmware { function_id, code });
        }
        Ok(result)
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Stop accepting calls, finish queued ones and join the worker
    ///
    /// Returns the number of calls the worker served.
    pub fn shutdown(mut self) -> Result<u64> {
        self.stop()
    }

    fn stop(&mut self) -> Result<u64> {
        self.queue.take();
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| {
                log::error!("secure call: worker panicked");
                SecureCallError::WorkerGone
            }),
            None => Ok(0),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn serve<S: SecureMonitor>(
    mut monitor: S,
    cpu: usize,
    ready: Sender<core::result::Result<(), String>>,
    requests: Receiver<Request>,
) -> u64 {
    let pinned = monitor.pin_to_cpu(cpu);
    let refused = pinned.is_err();
    let _ = ready.send(pinned);
    if refused {
        return 0;
    }
    let mut served = 0;

    for request in requests.iter() {
        let result = monitor.call(&request.args);
        served += 1;
        log::trace!(
            "secure call {:#x} -> {:#x}",
            request.args.function_id,
            result.0[0]
        );
        if request.reply.send(result).is_err() {
            log::debug!(
                "secure call {:#x}: caller gave up before reply",
                request.args.function_id
            );
        }
    }

    log::info!("secure call: worker exiting after {} calls", served);
    served
}
