//! Test utilities: an in-memory ADB server and channels with scripted timing
//!
//! Compiled for this crate's own tests and, behind the `test-helpers`
//! feature, for the workspace integration tests.

mod channels;
mod fake_server;

use std::sync::Arc;
use std::time::Duration;

use adblib_core::AdbSessionConfig;

use crate::session::AdbSession;

pub use channels::{
    FailingInputChannel, Gate, GatedInputChannel, ScriptStep, ScriptedChannel,
    ScriptedChannelProvider, ScriptedInputChannel, StepSignal, SteppedInputChannel,
    DEVICE_REQUEST_ACCEPTED,
};
pub use fake_server::{FakeAdbServer, FakeDevice, FakeFile};

/// Session config with a short tracker retry delay
pub fn test_config() -> AdbSessionConfig {
    AdbSessionConfig::default().with_retry_delay(Duration::from_millis(20))
}

/// Session talking to `server`
pub fn test_session(server: &FakeAdbServer) -> AdbSession {
    AdbSession::with_provider(Arc::new(server.clone()), test_config())
}
