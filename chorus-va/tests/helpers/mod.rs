//! Test Helper Utilities
//!
//! Shared utilities for chorus-va integration tests

#![allow(dead_code)]

pub mod audio_generator;
pub mod harness;

pub use audio_generator::{melody, silence, write_wav, Note};
pub use harness::{test_config, SlowSeparator, TestHarness};
