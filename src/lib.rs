//! Purpose: Library crate behind `libprintbridge` and the `printbridge` CLI.
//! Exports: `abi` (C entry points), `api` (safe Rust surface), `core`, `config`, `logging`.
//! Role: One implementation of the print-operation lifecycle shared by every front end.
//! Invariants: Handles are registry ids; no front end hands out pointers to bridge memory.
//! Invariants: `api` is the stable Rust surface; `core` stays available for tests and tooling.
pub mod abi;
pub mod api;
pub mod config;
pub mod core;
pub mod logging;
