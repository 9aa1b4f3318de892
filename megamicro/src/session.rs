//! The Session Coordinator (C8): the top-level `run`/`stop`/`wait` API
//! that composes C1→C2→{C3,C4,C6} in live mode, or C5→{C3,C4,C6} in
//! playback mode, behind one process-wide one-session-at-a-time guard.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use mu_core::CancellationToken;
use mu_device::UsbDevice;
use mu_file::{H5Recorder, PlaybackReader};
use mu_net::hub::SessionController;
use mu_net::{BroadcastHub, NetError};
use mu_transfer::{DeviceBackend, DeviceKind, Frame, ResolvedParameters, TransferEngine, Word};
use serde_json::{json, Value};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};

use crate::error::{Result, SessionError};
use crate::params::SessionParams;

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    outcome: Arc<Mutex<Option<Result<()>>>>,
    _permit: OwnedSemaphorePermit,
}

/// Owns the process-wide one-session semaphore and the currently running
/// worker, if any. Cloning shares both.
#[derive(Clone)]
pub struct Session {
    semaphore: Arc<Semaphore>,
    hub: BroadcastHub,
    worker: Arc<Mutex<Option<Worker>>>,
    last_params: Arc<Mutex<Option<Value>>>,
}

impl Session {
    pub fn new(hub: BroadcastHub) -> Self {
        Session {
            semaphore: Arc::new(Semaphore::new(1)),
            hub,
            worker: Arc::new(Mutex::new(None)),
            last_params: Arc::new(Mutex::new(None)),
        }
    }

    /// Apply defaults, validate, and compute derived fields without
    /// starting anything.
    pub fn configure(&self, params_map: Value) -> Result<ResolvedParameters> {
        let params: SessionParams = serde_json::from_value(params_map)?;
        let vendor_id = params.vendor_id();
        let product_id = params.product_id();
        let resolved = params.resolve()?;
        let _ = (vendor_id, product_id);
        Ok(resolved)
    }

    /// Starts a background worker that owns C2 (or C5). Returns
    /// immediately; errors discovered after startup surface via `wait()`.
    pub fn run(&self, params_map: Value) -> Result<()> {
        let mut slot = self.worker.lock().unwrap();
        if let Some(worker) = slot.as_ref() {
            if !worker.handle.is_finished() {
                return Err(SessionError::AlreadyRunning);
            }
        }

        let params: SessionParams = serde_json::from_value(params_map.clone())?;
        let vendor_id = params.vendor_id();
        let product_id = params.product_id();
        let resolved = params.resolve()?;

        let permit = Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .map_err(|_| SessionError::AlreadyRunning)?;

        let cancel = CancellationToken::new();
        let outcome = Arc::new(Mutex::new(None));

        let worker_cancel = cancel.clone();
        let worker_hub = self.hub.clone();
        let worker_outcome = Arc::clone(&outcome);
        let worker_resolved = resolved.clone();
        let handle = std::thread::spawn(move || {
            let result = run_worker(worker_resolved, worker_cancel, worker_hub, vendor_id, product_id);
            if let Err(error) = &result {
                error!(%error, "acquisition session ended with an error");
            } else {
                info!("acquisition session completed");
            }
            *worker_outcome.lock().unwrap() = Some(result);
        });

        *slot = Some(Worker {
            cancel,
            handle,
            outcome,
            _permit: permit,
        });
        *self.last_params.lock().unwrap() = Some(params_map);
        Ok(())
    }

    /// Sets the cooperative stop flag. Safe to call at any time, including
    /// before a prior `run()` has fully started; never raises.
    pub fn stop(&self) {
        if let Some(worker) = self.worker.lock().unwrap().as_ref() {
            worker.cancel.stop();
        }
    }

    /// Joins the worker, re-raising any error it captured.
    pub fn wait(&self) -> Result<()> {
        let worker = self.worker.lock().unwrap().take();
        match worker {
            Some(worker) => {
                worker.handle.join().map_err(|_| SessionError::WorkerPanicked)?;
                worker.outcome.lock().unwrap().take().unwrap_or(Ok(()))
            }
            None => Err(SessionError::NotConfigured),
        }
    }

    pub fn is_alive(&self) -> bool {
        match self.worker.lock().unwrap().as_ref() {
            Some(worker) => !worker.handle.is_finished(),
            None => false,
        }
    }
}

/// Lets `mu_net::hub::serve` drive a `Session` without `mu-net` depending
/// on this crate.
impl SessionController for Session {
    fn start(&self, parameters: Value) -> mu_net::Result<()> {
        self.run(parameters).map_err(|error| NetError::ProtocolError(error.to_string()))
    }

    fn status(&self) -> Value {
        json!({
            "alive": self.is_alive(),
            "available_permits": self.semaphore.available_permits(),
        })
    }

    fn parameters(&self) -> Value {
        self.last_params.lock().unwrap().clone().unwrap_or(Value::Null)
    }
}

impl Session {
    /// Builds the callback the scheduler's dispatcher loop invokes when a
    /// scheduled job comes due. A job that fires while another session is
    /// still running is dropped with a warning rather than queued, since
    /// `run` itself is the one-session gate.
    pub fn job_runner(&self) -> mu_net::JobRunner {
        let session = self.clone();
        Box::new(move |parameters: Value| {
            if let Err(error) = session.run(parameters) {
                warn!(%error, "scheduled job could not start");
            }
        })
    }
}

fn run_worker(
    resolved: ResolvedParameters,
    cancel: CancellationToken,
    hub: BroadcastHub,
    vendor_id: u16,
    product_id: u16,
) -> Result<()> {
    match resolved.params.datatype {
        mu_transfer::Datatype::Int32 => run_typed::<i32>(resolved, cancel, hub, vendor_id, product_id),
        mu_transfer::Datatype::Float32 => run_typed::<f32>(resolved, cancel, hub, vendor_id, product_id),
    }
}

fn run_typed<W: Word + hdf5::H5Type>(
    resolved: ResolvedParameters,
    cancel: CancellationToken,
    hub: BroadcastHub,
    vendor_id: u16,
    product_id: u16,
) -> Result<()> {
    match resolved.params.device {
        DeviceKind::File => {
            let playback = resolved
                .params
                .playback
                .clone()
                .ok_or_else(|| SessionError::Config("file device requires playback options".to_string()))?;
            let reader = PlaybackReader::<W>::open(
                &playback.path,
                &resolved,
                playback.start_time_pct,
                playback.loop_playback,
                cancel.clone(),
            )?;
            drive_engine(reader, resolved, cancel, hub)
        }
        live => {
            let mut device = UsbDevice::open(vendor_id, product_id)?;
            device.reset_full()?;
            device.set_clock_divisor(resolved.params.clockdiv as u8)?;
            let sample_count = if resolved.params.duration > 0.0 {
                (resolved.params.duration * resolved.sampling_frequency).round() as u32
            } else {
                0
            };
            device.set_sample_count(sample_count)?;
            device.set_datatype(resolved.params.datatype)?;
            let total_beams = live.total_beams().unwrap_or(128);
            device.activate_mems(&resolved.params.mems, total_beams)?;
            device.activate_aux(resolved.params.counter, resolved.params.status, &resolved.params.analogs)?;
            device.set_geometry(
                resolved.channels_per_frame as usize,
                resolved.params.buffer_length as usize,
                resolved.sampling_frequency,
            );
            device.start(resolved.params.start_trig)?;
            drive_engine(device, resolved, cancel, hub)
        }
    }
}

fn drive_engine<W: Word + hdf5::H5Type, B: DeviceBackend>(
    backend: B,
    resolved: ResolvedParameters,
    cancel: CancellationToken,
    hub: BroadcastHub,
) -> Result<()> {
    let mut engine = TransferEngine::<W, B>::new(backend, resolved.clone(), cancel.clone());

    let mut recorder_handle = None;
    if let Some(h5) = resolved.params.h5.clone() {
        if h5.enabled {
            let channels_after_skip = resolved.channels_per_frame as usize - resolved.params.counter_skip as usize;
            let recorder = Arc::new(Mutex::new(H5Recorder::<W>::new(&resolved, h5.root_dir.clone(), channels_after_skip)));
            let recorder_for_sink = Arc::clone(&recorder);
            let failure_cancel = cancel.clone();
            engine = engine.with_file_sink(Box::new(move |frame: &Frame<W>| {
                if let Err(error) = recorder_for_sink.lock().unwrap().write_frame(frame, frame.transfer_timestamp) {
                    error!(%error, "H5 write failed, stopping session");
                    failure_cancel.stop();
                }
            }));
            recorder_handle = Some(recorder);
        }
    } else {
        warn!("session has no H5 options; recording is disabled for this run");
    }

    hub.begin_session(&resolved);
    engine = engine.with_hub_sink(hub.frame_sink::<W>());
    let result = engine.run();
    hub.end_session();

    // Flush any partial dataset now that the engine (and its file_sink
    // closure's Arc clone) has been dropped.
    if let Some(recorder) = recorder_handle {
        if let Err(error) = recorder.lock().unwrap().close() {
            error!(%error, "failed to flush final H5 dataset");
        }
    }

    result.map(|_| ()).map_err(SessionError::Transfer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_computes_derived_fields() {
        let session = Session::new(BroadcastHub::new());
        let resolved = session.configure(serde_json::json!({"mems": [0, 1, 2, 3]})).unwrap();
        assert_eq!(resolved.channels_per_frame, 5);
    }

    #[test]
    fn wait_without_run_reports_not_configured() {
        let session = Session::new(BroadcastHub::new());
        assert!(matches!(session.wait(), Err(SessionError::NotConfigured)));
    }

    #[test]
    fn stop_before_run_never_panics() {
        let session = Session::new(BroadcastHub::new());
        session.stop();
    }

    #[test]
    fn is_alive_false_before_run() {
        let session = Session::new(BroadcastHub::new());
        assert!(!session.is_alive());
    }

    #[test]
    fn run_with_missing_playback_file_surfaces_error_through_wait() {
        let session = Session::new(BroadcastHub::new());
        let params = serde_json::json!({
            "device": "file",
            "mems": [0],
            "playback": {"path": "/nonexistent/recording.h5"},
        });
        session.run(params).unwrap();
        let result = session.wait();
        assert!(result.is_err());
    }

    #[test]
    fn controller_parameters_reflects_last_run_request() {
        let session = Session::new(BroadcastHub::new());
        assert_eq!(SessionController::parameters(&session), Value::Null);

        let params = serde_json::json!({
            "device": "file",
            "mems": [0],
            "playback": {"path": "/nonexistent/recording.h5"},
        });
        SessionController::start(&session, params.clone()).unwrap();
        assert_eq!(SessionController::parameters(&session), params);
        session.wait().ok();
    }

    #[test]
    fn controller_start_rejects_second_concurrent_session() {
        let session = Session::new(BroadcastHub::new());
        let params = serde_json::json!({
            "device": "file",
            "mems": [0],
            "playback": {"path": "/nonexistent/recording.h5", "loop_playback": true},
        });
        SessionController::start(&session, params.clone()).unwrap();
        assert!(SessionController::start(&session, params).is_err());
        session.stop();
        session.wait().ok();
    }

    #[test]
    fn job_runner_starts_a_session() {
        let session = Session::new(BroadcastHub::new());
        let runner = session.job_runner();
        runner(serde_json::json!({
            "device": "file",
            "mems": [0],
            "playback": {"path": "/nonexistent/recording.h5"},
        }));
        assert!(session.is_alive() || session.wait().is_err());
    }
}
