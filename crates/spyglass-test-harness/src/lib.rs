//! Test harness for the spyglass SpyServer client.
//!
//! [`MockSpyServer`] is a scripted SpyServer listening on a random localhost
//! port: it answers the client's HELLO with configurable device-info and
//! client-sync frames, records every command the client sends, and pushes
//! arbitrary data frames on request. The [`frames`] module builds wire
//! frames for tests that drive the client (or the frame decoder) directly.

pub mod frames;
pub mod mock_server;

pub use mock_server::{default_client_sync, default_device_info, MockSpyServer, ServerBehavior};
