use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{AvError, AvResult};

/// Lifecycle state of a [`Stream`](super::Stream).
///
/// ```text
/// Closed -> Opened -> Started <-> Stopped -> Closed -> Disposed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamState {
    Closed,
    Opened,
    Started,
    Stopped,
    Disposed,
}

/// Lifecycle operation requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOp {
    Open,
    Start,
    Stop,
    Close,
    Dispose,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamState::Closed => "closed",
            StreamState::Opened => "opened",
            StreamState::Started => "started",
            StreamState::Stopped => "stopped",
            StreamState::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

impl fmt::Display for StreamOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamOp::Open => "open",
            StreamOp::Start => "start",
            StreamOp::Stop => "stop",
            StreamOp::Close => "close",
            StreamOp::Dispose => "dispose",
        };
        f.write_str(s)
    }
}

impl StreamState {
    /// Session accessors are only valid in these states.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            StreamState::Opened | StreamState::Started | StreamState::Stopped
        )
    }

    /// State reached by applying `op`, or `IllegalState`.
    ///
    /// Stopping an already stopped stream is accepted so that a stream
    /// halted by its backend can still be stopped explicitly.
    pub fn next(self, op: StreamOp) -> AvResult<StreamState> {
        use StreamOp::*;
        use StreamState::*;

        match (self, op) {
            (Closed, Open) => Ok(Opened),
            (Opened | Stopped, Start) => Ok(Started),
            (Started | Stopped, Stop) => Ok(Stopped),
            (Opened | Stopped, Close) => Ok(Closed),
            (Closed, Dispose) => Ok(Disposed),
            (state, op) => Err(AvError::illegal_state(format!(
                "cannot {op} a stream that is {state}"
            ))),
        }
    }
}
