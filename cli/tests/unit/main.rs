//! Unit tests for shipyard CLI
//!
//! These tests use recording backends and run fast without spawning
//! multipass.

mod provision_flow;
