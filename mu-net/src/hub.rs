//! The Broadcast Hub (C6): fans out each acquisition frame to subscribed
//! listeners, re-routed through a per-listener channel mask.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use mu_transfer::{Frame, ResolvedParameters, Word};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use crate::error::{NetError, Result};
use crate::h5handler::H5Handler;
use crate::listener::{Listener, ListenerId};
use crate::scheduler::Scheduler;
use crate::wire::{H5Command, Request, Response, SchedulerCommand};

/// Row offset bookkeeping for the active session's post-`counter_skip`
/// frame layout: `[counter?][mems...][analogs...][status?]`.
#[derive(Debug, Clone)]
struct Layout {
    mems: Vec<u32>,
    analogs: Vec<u32>,
    base: usize,
    analogs_base: usize,
}

impl Layout {
    fn from_params(params: &ResolvedParameters) -> Self {
        let base = if params.params.counter && !params.params.counter_skip { 1 } else { 0 };
        let analogs_base = base + params.params.mems.len();
        Layout {
            mems: params.params.mems.clone(),
            analogs: params.params.analogs.clone(),
            base,
            analogs_base,
        }
    }

    fn mem_row(&self, mem: u32) -> Option<usize> {
        self.mems.iter().position(|&m| m == mem).map(|i| self.base + i)
    }

    fn analog_row(&self, analog: u32) -> Option<usize> {
        self.analogs.iter().position(|&a| a == analog).map(|i| self.analogs_base + i)
    }

    /// Translate a subscriber's requested channel set into frame row
    /// indices, rejecting any channel absent from the active session.
    fn rows_for(&self, mems: &[u32], analogs: &[u32]) -> Result<Vec<usize>> {
        let mut rows = Vec::with_capacity(mems.len() + analogs.len());
        for &mem in mems {
            rows.push(self.mem_row(mem).ok_or(NetError::ChannelUnavailable(mem))?);
        }
        for &analog in analogs {
            rows.push(self.analog_row(analog).ok_or(NetError::ChannelUnavailable(analog))?);
        }
        Ok(rows)
    }
}

struct Inner {
    layout: Option<Layout>,
    listeners: HashMap<ListenerId, Listener>,
    next_id: ListenerId,
}

/// Shared handle to the hub's listener registry and active-session
/// layout. Cloned into the runner's frame-sink closure and into every
/// WebSocket connection task.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<Mutex<Inner>>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        BroadcastHub {
            inner: Arc::new(Mutex::new(Inner {
                layout: None,
                listeners: HashMap::new(),
                next_id: 1,
            })),
        }
    }

    /// Called by the Session Coordinator when a run starts.
    pub fn begin_session(&self, params: &ResolvedParameters) {
        let mut inner = self.inner.lock().unwrap();
        inner.layout = Some(Layout::from_params(params));
    }

    /// Called when a run ends; notifies every listener and clears masks.
    pub fn end_session(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.layout = None;
        let end = serde_json::to_string(&crate::wire::Response::end()).unwrap();
        inner.listeners.retain(|_, listener| listener.send_text(end.clone()));
    }

    pub fn register(&self, sender: tokio::sync::mpsc::UnboundedSender<tokio_tungstenite::tungstenite::Message>) -> ListenerId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.insert(id, Listener::new(id, sender));
        id
    }

    pub fn unregister(&self, id: ListenerId) {
        self.inner.lock().unwrap().listeners.remove(&id);
    }

    /// Validate and install a listener's requested channel mask.
    pub fn subscribe(&self, id: ListenerId, mems: &[u32], analogs: &[u32], counter: bool, status: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let rows = match &inner.layout {
            Some(layout) => layout.rows_for(mems, analogs)?,
            None => return Err(NetError::ProtocolError("no active session".into())),
        };
        if let Some(listener) = inner.listeners.get_mut(&id) {
            listener.set_mask(rows, counter, status);
            Ok(())
        } else {
            Err(NetError::SubscriberGone)
        }
    }

    /// Returns a closure suitable for `TransferEngine::with_hub_sink`,
    /// selecting and serializing each listener's masked rows.
    pub fn frame_sink<W: Word>(&self) -> Box<dyn FnMut(&Frame<W>) + Send> {
        let inner = Arc::clone(&self.inner);
        Box::new(move |frame: &Frame<W>| {
            let mut guard = inner.lock().unwrap();
            let mut dead = Vec::new();
            for (id, listener) in guard.listeners.iter() {
                if listener.rows.is_empty() {
                    continue;
                }
                let selected = frame.select_rows(&listener.rows);
                if !listener.send_frame(selected.to_le_bytes()) {
                    dead.push(*id);
                }
            }
            for id in dead {
                trace!(listener = id, "evicting listener with closed socket");
                guard.listeners.remove(&id);
            }
        })
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().unwrap().listeners.len()
    }

    /// Called by the Session Coordinator when the runner itself dies;
    /// distinct from `end_session` in that it reports failure.
    pub fn notify_runner_failure(&self, reason: &str) {
        let inner = self.inner.lock().unwrap();
        let error = serde_json::to_string(&crate::wire::Response::error("RunnerFailure", reason)).unwrap();
        for listener in inner.listeners.values() {
            if !listener.send_text(error.clone()) {
                warn!(listener = listener.id, "failed to notify listener of runner failure");
            }
        }
    }
}

/// The session-level operations the WebSocket server dispatches `run`,
/// `status`, and `parameters` requests to. Implemented by the Session
/// Coordinator; kept as a trait here so `mu-net` never depends on
/// `megamicro`.
pub trait SessionController: Send + Sync {
    fn start(&self, parameters: Value) -> Result<()>;
    fn status(&self) -> Value;
    fn parameters(&self) -> Value;
}

/// Accepts subscriber connections on `addr` until the process shuts down.
/// Each connection is handled on its own task, sharing `hub`, `controller`,
/// `h5_root`, and `scheduler`.
pub async fn serve(
    addr: SocketAddr,
    hub: BroadcastHub,
    controller: Arc<dyn SessionController>,
    h5_root: std::path::PathBuf,
    scheduler: Scheduler,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "broadcast hub listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let hub = hub.clone();
        let controller = Arc::clone(&controller);
        let h5_root = h5_root.clone();
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            if let Err(error) = handle_connection(stream, peer, hub, controller, h5_root, scheduler).await {
                debug!(%peer, %error, "subscriber connection closed");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: BroadcastHub,
    controller: Arc<dyn SessionController>,
    h5_root: std::path::PathBuf,
    scheduler: Scheduler,
) -> std::result::Result<(), NetError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let id = hub.register(out_tx);
    let mut h5 = H5Handler::new(h5_root);

    let pump = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if write.send(message).is_err() {
                break;
            }
        }
    });

    while let Some(message) = read.next().await {
        let message = message?;
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let parsed = serde_json::from_str::<Request>(&text);

        // h5get streams binary chunks between START/STOP responses instead
        // of returning a single response, so it bypasses the generic
        // dispatch table.
        if let Ok(Request::H5Handler { parameters: H5Command::H5get { filename } }) = &parsed {
            match h5.get(filename) {
                Ok(chunks) => {
                    send_response(&hub, id, Response::start(filename.clone()));
                    for chunk in chunks {
                        if hub.send_binary(id, chunk).is_none() {
                            break;
                        }
                    }
                    send_response(&hub, id, Response::stop());
                }
                Err(error) => send_response(&hub, id, Response::error("FileNotFound", error.to_string())),
            }
            continue;
        }

        let response = match parsed {
            Ok(request) => dispatch(request, id, &hub, &controller, &mut h5, &scheduler),
            Err(error) => Response::error("ProtocolError", error.to_string()),
        };
        let is_exit = matches!(&response, Response::Response { response, .. } if response == "EXIT");
        if send_response(&hub, id, response).is_none() || is_exit {
            break;
        }
    }

    hub.unregister(id);
    pump.abort();
    Ok(())
}

fn dispatch(
    request: Request,
    id: ListenerId,
    hub: &BroadcastHub,
    controller: &Arc<dyn SessionController>,
    h5: &mut H5Handler,
    scheduler: &Scheduler,
) -> Response {
    match request {
        Request::Run { parameters } => match controller.start(parameters) {
            Ok(()) => Response::ok("run accepted"),
            Err(error) => Response::error("RunFailed", error.to_string()),
        },
        Request::Listen { parameters } => {
            match hub.subscribe(id, &parameters.mems, &parameters.analogs, parameters.counter, parameters.status) {
                Ok(()) => Response::ok("listening"),
                Err(error) => Response::error("ChannelUnavailable", error.to_string()),
            }
        }
        Request::Status => Response::status(controller.status()),
        Request::Parameters => Response::parameters(controller.parameters()),
        Request::Scheduler { parameters } => dispatch_scheduler(parameters, scheduler),
        Request::H5Handler { parameters } => dispatch_h5(parameters, h5),
        Request::Exit => Response::Response { response: "EXIT".into(), message: "closing connection".into() },
    }
}

fn dispatch_scheduler(command: SchedulerCommand, scheduler: &Scheduler) -> Response {
    match command {
        SchedulerCommand::Run { sched_start_time, sched_stop_time, job_parameters } => {
            match scheduler.run(sched_start_time, sched_stop_time, job_parameters) {
                Ok(task_id) => Response::ok(format!("scheduled task {task_id}")),
                Err(error) => Response::error("JobConflict", error.to_string()),
            }
        }
        SchedulerCommand::Prun { sched_start_time, sched_stop_time, sched_repeat_time, job_parameters } => {
            match scheduler.prun(sched_start_time, sched_stop_time, sched_repeat_time, job_parameters) {
                Ok(task_id) => Response::ok(format!("scheduled repeating task {task_id}")),
                Err(error) => Response::error("JobConflict", error.to_string()),
            }
        }
        SchedulerCommand::Lsjob => {
            let jobs: Vec<Value> = scheduler
                .lsjob()
                .into_iter()
                .map(|job| {
                    serde_json::json!({
                        "task_id": job.task_id,
                        "start": job.start,
                        "stop": job.stop,
                        "repeat": job.repeat,
                    })
                })
                .collect();
            Response::status(Value::Array(jobs))
        }
        SchedulerCommand::Rmjob { task_id } => match scheduler.rmjob(task_id) {
            Ok(()) => Response::ok(format!("removed task {task_id}")),
            Err(error) => Response::error("JobNotFound", error.to_string()),
        },
    }
}

fn dispatch_h5(command: H5Command, h5: &mut H5Handler) -> Response {
    match command {
        H5Command::H5cd { path } => match h5.cd(&path) {
            Ok(()) => Response::ok(h5.pwd()),
            Err(error) => Response::error("PathEscapesRoot", error.to_string()),
        },
        H5Command::H5ls => match h5.ls() {
            Ok(files) => Response::status(Value::from(files)),
            Err(error) => Response::error("Io", error.to_string()),
        },
        H5Command::AllLs => match h5.ls_all() {
            Ok(entries) => Response::status(Value::from(entries)),
            Err(error) => Response::error("Io", error.to_string()),
        },
        H5Command::H5pwd | H5Command::H5cwd => Response::ok(h5.pwd()),
        // Handled before dispatch() is reached; see handle_connection.
        H5Command::H5get { .. } => unreachable!("h5get is intercepted before generic dispatch"),
    }
}

fn send_response(hub: &BroadcastHub, id: ListenerId, response: Response) -> Option<()> {
    let payload = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
    hub.send_to(id, payload)
}

impl BroadcastHub {
    /// Serializes and sends a single response to one listener, returning
    /// `None` if the listener is gone (the connection task should close).
    fn send_to(&self, id: ListenerId, text: String) -> Option<()> {
        let inner = self.inner.lock().unwrap();
        inner.listeners.get(&id).and_then(|listener| listener.send_text(text).then_some(()))
    }

    /// Sends a raw binary chunk to one listener, used for `h5get`
    /// streaming outside the normal per-frame fan-out path.
    fn send_binary(&self, id: ListenerId, bytes: Vec<u8>) -> Option<()> {
        let inner = self.inner.lock().unwrap();
        inner.listeners.get(&id).and_then(|listener| listener.send_frame(bytes).then_some(()))
    }
}

#[cfg(test)]
mod tests {
    use mu_transfer::{DeviceKind, ParamBuilder};
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    use super::*;

    fn resolved(mems: Vec<u32>, analogs: Vec<u32>, counter: bool, counter_skip: bool) -> ResolvedParameters {
        ParamBuilder::new()
            .device(DeviceKind::Mu32)
            .mems(mems)
            .analogs(analogs)
            .counter(counter)
            .counter_skip(counter_skip)
            .resolve()
            .unwrap()
    }

    #[test]
    fn subscribe_maps_requested_channels_to_rows() {
        let hub = BroadcastHub::new();
        hub.begin_session(&resolved(vec![0, 1, 2, 3], vec![], true, true));
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = hub.register(tx);
        hub.subscribe(id, &[1, 3], &[], false, false).unwrap();
    }

    #[test]
    fn subscribe_rejects_channel_outside_session() {
        let hub = BroadcastHub::new();
        hub.begin_session(&resolved(vec![0, 1], vec![], true, true));
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = hub.register(tx);
        let result = hub.subscribe(id, &[7], &[], false, false);
        assert!(matches!(result, Err(NetError::ChannelUnavailable(7))));
    }

    #[test]
    fn frame_sink_delivers_only_masked_rows() {
        // Scenario 3: session mems=[0,1,2,3], listener subscribes mems=[1,3].
        let hub = BroadcastHub::new();
        let params = resolved(vec![0, 1, 2, 3], vec![], false, false);
        hub.begin_session(&params);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.register(tx);
        hub.subscribe(id, &[1, 3], &[], false, false).unwrap();

        let words: Vec<i32> = vec![10, 20, 30, 40];
        let frame = Frame::<i32>::from_raw_words(&words, 4, 1, 0.0).unwrap();
        let mut sink = hub.frame_sink::<i32>();
        sink(&frame);

        match rx.try_recv().unwrap() {
            Message::Binary(bytes) => {
                let a = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
                let b = i32::from_le_bytes(bytes[4..8].try_into().unwrap());
                assert_eq!((a, b), (20, 40));
            }
            other => panic!("expected binary frame, got {other:?}"),
        }
    }

    #[test]
    fn frame_sink_evicts_listener_whose_receiver_dropped() {
        let hub = BroadcastHub::new();
        hub.begin_session(&resolved(vec![0, 1], vec![], false, false));
        let (tx, rx) = mpsc::unbounded_channel();
        let id = hub.register(tx);
        hub.subscribe(id, &[0], &[], false, false).unwrap();
        drop(rx);

        let words: Vec<i32> = vec![1, 2];
        let frame = Frame::<i32>::from_raw_words(&words, 2, 1, 0.0).unwrap();
        let mut sink = hub.frame_sink::<i32>();
        sink(&frame);

        assert_eq!(hub.listener_count(), 0);
    }
}
