// src/runtime/mod.rs

//! Core asynchronous primitives: deferred results and their completions.

pub mod deferred;

pub use deferred::{Completion, Deferred};
