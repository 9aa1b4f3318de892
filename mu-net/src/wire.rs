//! JSON request/response objects framed over the subscriber WebSocket,
//! interleaved with raw binary sample frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Incoming control message. Raw binary frames carrying sample data are
/// not modeled here; they arrive as `Message::Binary` alongside these.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum Request {
    Run { parameters: Value },
    Listen { parameters: ListenParameters },
    Status,
    Parameters,
    Scheduler { parameters: SchedulerCommand },
    H5Handler { parameters: H5Command },
    Exit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenParameters {
    #[serde(default)]
    pub mems: Vec<u32>,
    #[serde(default)]
    pub analogs: Vec<u32>,
    #[serde(default)]
    pub counter: bool,
    #[serde(default)]
    pub status: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum SchedulerCommand {
    Run {
        sched_start_time: f64,
        sched_stop_time: f64,
        #[serde(default)]
        job_parameters: Value,
    },
    Prun {
        sched_start_time: f64,
        sched_stop_time: f64,
        sched_repeat_time: f64,
        #[serde(default)]
        job_parameters: Value,
    },
    Lsjob,
    Rmjob {
        task_id: u64,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum H5Command {
    H5cd { path: String },
    H5ls,
    #[serde(rename = "*ls")]
    AllLs,
    H5pwd,
    H5cwd,
    H5get { filename: String },
}

/// Outgoing response. `h5get` additionally streams `Message::Binary`
/// blocks between the `START` and `STOP` responses.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Response {
    Status {
        response: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<Value>,
    },
    Response {
        response: String,
        message: String,
    },
    Error {
        response: String,
        error: String,
        message: String,
    },
    Parameters {
        response: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        parameters: Option<Value>,
    },
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Response::Response {
            response: "OK".into(),
            message: message.into(),
        }
    }

    pub fn end() -> Self {
        Response::Response {
            response: "END".into(),
            message: "end of service".into(),
        }
    }

    pub fn start(message: impl Into<String>) -> Self {
        Response::Response {
            response: "START".into(),
            message: message.into(),
        }
    }

    pub fn stop() -> Self {
        Response::Response {
            response: "STOP".into(),
            message: "transfer complete".into(),
        }
    }

    pub fn error(class: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Error {
            response: "NOT OK".into(),
            error: class.into(),
            message: message.into(),
        }
    }

    pub fn status(status: Value) -> Self {
        Response::Status {
            response: "OK".into(),
            message: "status".into(),
            status: Some(status),
        }
    }

    pub fn parameters(parameters: Value) -> Self {
        Response::Parameters {
            response: "OK".into(),
            message: "parameters".into(),
            parameters: Some(parameters),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_request() {
        let json = r#"{"request": "run", "parameters": {"mems": [0,1]}}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        assert!(matches!(request, Request::Run { .. }));
    }

    #[test]
    fn parses_listen_request_with_defaults() {
        let json = r#"{"request": "listen", "parameters": {"mems": [1,3]}}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        match request {
            Request::Listen { parameters } => {
                assert_eq!(parameters.mems, vec![1, 3]);
                assert!(!parameters.counter);
            }
            _ => panic!("expected Listen"),
        }
    }

    #[test]
    fn parses_scheduler_rmjob() {
        let json = r#"{"request": "scheduler", "parameters": {"command": "rmjob", "task_id": 7}}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        match request {
            Request::Scheduler { parameters: SchedulerCommand::Rmjob { task_id } } => assert_eq!(task_id, 7),
            _ => panic!("expected Rmjob"),
        }
    }

    #[test]
    fn rejects_unknown_request_variant() {
        let json = r#"{"request": "bogus"}"#;
        let result: std::result::Result<Request, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn error_response_serializes_not_ok() {
        let response = Response::error("ChannelUnavailable", "channel 7 not in session");
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"response\":\"NOT OK\""));
        assert!(json.contains("\"type\":\"error\""));
    }
}
