//! In-process simulation toolkit for backbone integration testing.
//!
//! Provides an in-memory [`Transport`](backbone_node::Transport)
//! implementation, a shared fabric connecting simulated nodes, deterministic
//! topology generation, and test helpers — used by the scenario tests in
//! `tests/` to drive two or more coordinator instances against each other
//! without any real socket, serial port, or OS privilege.

pub mod network;
pub mod test_util;
pub mod topology;
