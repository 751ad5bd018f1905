//! Per-project container sandboxes driven by a tool-using coding agent.
//!
//! Layers, leaf first:
//! - [`sandbox`]: container runtime client and sandbox lifecycle
//! - [`files`]: path-confined file and git access inside a sandbox
//! - [`tools`]: the tool catalog and dispatch
//! - [`backend`]: completion backends
//! - [`agent`]: the reason-act loop and its event stream

pub mod agent;
pub mod backend;
pub mod config;
pub mod files;
pub mod sandbox;
pub mod tools;
