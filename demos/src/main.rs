//! Runs the Broadcast Hub WebSocket server in front of a `megamicro::Session`,
//! with a handful of jobs pre-loaded into the scheduler. Hardcoded
//! parameters throughout; stop with Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use megamicro::Session;
use mu_net::hub::{serve, SessionController};
use mu_net::{BroadcastHub, Scheduler};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let hub = BroadcastHub::new();
    let session = Session::new(hub.clone());
    let controller: Arc<dyn SessionController> = Arc::new(session.clone());

    let scheduler = Scheduler::new();
    let (_shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
    scheduler.spawn_dispatcher(session.job_runner(), shutdown_rx);

    let session_for_ctrlc = session.clone();
    ctrlc::set_handler(move || {
        session_for_ctrlc.stop();
        std::process::exit(0);
    })
    .expect("failed to install Ctrl-C handler");

    let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
    let h5_root = PathBuf::from(".");
    if let Err(error) = serve(addr, hub, controller, h5_root, scheduler).await {
        tracing::error!(%error, "broadcast hub server exited");
    }
}
