//! Integration tests for Sterling
//!
//! These tests drive the client against an in-process fake runner server.

#[path = "../common/mod.rs"]
pub mod common;

pub mod file_tree;
pub mod merge_flow;
pub mod run_stream;
pub mod sidebar_flow;
