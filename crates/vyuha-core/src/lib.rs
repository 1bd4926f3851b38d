// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod bus;
mod context;
mod error;
mod events;
mod guardians;
mod learning;
mod observer;
mod session;
mod stream;
mod tree;
mod turn;

pub use bus::{EventBus, Subscription};
pub use context::ContextManager;
pub use error::CoreError;
pub use events::{Event, EventKind};
pub use guardians::{
    CorrectnessGuardian, Finding, Guardian, GuardianSet, SafetyGuardian, Severity,
};
pub use learning::{LearningLoop, LearningSnapshot, ToolStats};
pub use observer::{ToolCallView, ToolObservation, ToolResultView, TurnObservation, TurnObserver};
pub use session::AgentState;
pub use stream::{collect_stream, StreamOutcome};
pub use tree::{AgentId, AgentNode, AgentRunner, AgentStatus, AgentTree};
pub use turn::{Heartbeat, SteeringQueue, StopCause, TurnLoop, TurnLoopRun};

pub use vyuha_tools::cancel::{CancelReason, CancellationToken, Cancelled};
