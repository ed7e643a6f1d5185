//! `mav_discovery`: MAVLink device discovery daemon library.
//!
//! Organized the way `maviola` separates protocol-agnostic building blocks
//! (`core`) from the synchronous runtime that drives them (`sync`): the
//! data model, frame recognizer and stores live alongside the OS-thread
//! components (verifier, watcher, supervisor, RPC bridge) that compose
//! them into a running daemon via [`runtime::Runtime`].

pub mod config;
pub mod error;
pub mod frame;
pub mod model;
pub mod rpc;
pub mod runtime;
pub mod store;
pub mod supervisor;
pub mod tracker;
pub mod usb_probe;
mod util;
pub mod verifier;
pub mod watcher;

pub use error::{Error, Result};
pub use runtime::Runtime;
