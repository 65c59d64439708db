//! Integration tests for shipyard CLI
//!
//! These tests spawn the actual binary and test end-to-end behavior.
//! None of them reach multipass: every case fails or finishes before the
//! backend is opened.

mod cli_tests;
