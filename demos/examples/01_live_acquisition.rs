//! Runs a short live acquisition on the default MU32 array, recording to
//! HDF5 under `./recordings`. Hardcoded parameters; stop early with Ctrl-C.

use megamicro::Session;
use mu_net::BroadcastHub;

fn main() {
    tracing_subscriber::fmt::init();

    let session = Session::new(BroadcastHub::new());
    let stop_session = session.clone();
    ctrlc::set_handler(move || stop_session.stop()).expect("failed to install Ctrl-C handler");

    let params = serde_json::json!({
        "mems": [0, 1, 2, 3, 4, 5, 6, 7],
        "counter": true,
        "duration": 10.0,
        "sampling_frequency": 50000.0,
        "h5": {
            "root_dir": "./recordings",
            "file_duration": 30.0,
        },
    });

    session.run(params).expect("failed to start acquisition");
    match session.wait() {
        Ok(()) => println!("acquisition finished"),
        Err(error) => eprintln!("acquisition failed: {error}"),
    }
}
