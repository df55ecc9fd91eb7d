// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! The daemon binary's library half: configuration, the wire protocol, the
//! RPC client and listener, the controller that ties consensus to the job
//! state machine, and the startup/shutdown sequence that wires them
//! together. `main.rs` is a thin shell around [`lifecycle::startup`] and
//! [`lifecycle::shutdown`].

pub mod client;
pub mod config;
pub mod controller;
pub mod lifecycle;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod server;

pub use client::TcpClient;
pub use config::{Config, ConfigError, PeerConfig};
pub use controller::{Consensus, Controller, ControllerError};
pub use lifecycle::{startup, shutdown, LifecycleError, RunningNode};
pub use metrics::{Metrics, NoopMetrics, RecordingMetrics};
pub use protocol::{ProtocolError, Request, Response};
pub use registry::{WorkerInfo, WorkerRegistry};
pub use server::{ListenCtx, Listener};
