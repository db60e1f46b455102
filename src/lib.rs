//! tsbridge: a Language Server Protocol front end for TypeScript's tsserver.
//!
//! The editor speaks LSP to this process; this process speaks tsserver's
//! JSON-lines dialect to a spawned child. Module map:
//! - [`document`]: mirror of the editor's open buffers
//! - [`protocol`]: the tsserver wire types
//! - [`tsserver`]: subprocess lifecycle and request correlation
//! - [`translate`]: LSP <-> tsserver shape conversions
//! - [`diagnostics`]: event aggregation and the debounced `geterr` loop
//! - [`completion`]: completion item construction and resolution
//! - [`backend`]: the LSP dispatcher
//! - [`calls`]: the proposed `textDocument/calls` request
//! - [`commands`]: `workspace/executeCommand` handlers

pub mod backend;
pub mod calls;
pub mod commands;
pub mod completion;
pub mod diagnostics;
pub mod document;
pub mod protocol;
pub mod translate;
pub mod tsserver;

pub use backend::{Backend, BridgeOptions};
