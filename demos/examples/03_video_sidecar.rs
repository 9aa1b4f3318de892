//! Runs the video sidecar on its own, independent of any acquisition
//! session, using the no-op sink. A real deployment swaps in a `VideoSink`
//! backed by an actual camera/encoder.

use std::time::Duration;

use mu_core::CancellationToken;
use mu_video::{NullVideoSink, Sidecar};

fn main() {
    tracing_subscriber::fmt::init();

    let cancel = CancellationToken::new();
    let stop_cancel = cancel.clone();
    ctrlc::set_handler(move || stop_cancel.stop()).expect("failed to install Ctrl-C handler");

    let sidecar = Sidecar::spawn(
        Box::new(NullVideoSink::default()),
        Duration::from_millis(40),
        60.0,
        cancel.clone(),
    );

    cancel.sleep(Duration::from_secs(5));
    cancel.stop();
    sidecar.join().expect("video sidecar worker panicked");
}
