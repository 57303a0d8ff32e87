//! nmstate node handler CLI
//!
//! Drives the staged apply engine, the observed state refresh and the
//! enactment status store on a single host.

pub mod commands;
pub mod context;


pub use context::{resolve_node, HandlerContext, DEFAULT_STORE_DIR, NODE_NAME_ENV};
