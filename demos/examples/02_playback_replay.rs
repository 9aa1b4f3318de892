//! Replays a previously recorded HDF5 file through the same transfer and
//! broadcast path a live acquisition uses, without re-recording it.

use megamicro::Session;
use mu_net::BroadcastHub;

fn main() {
    tracing_subscriber::fmt::init();

    let session = Session::new(BroadcastHub::new());

    let params = serde_json::json!({
        "device": "file",
        "mems": [0, 1, 2, 3, 4, 5, 6, 7],
        "counter": true,
        "sampling_frequency": 50000.0,
        "playback": {
            "path": "./recordings/session.h5",
            "loop_playback": false,
        },
    });

    session.run(params).expect("failed to start playback");
    match session.wait() {
        Ok(()) => println!("playback finished"),
        Err(error) => eprintln!("playback failed: {error}"),
    }
}
