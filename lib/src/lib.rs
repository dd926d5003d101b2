//! # Host-to-image migration inspector
//!
//! This crate inspects a package-managed host through a read-only mount
//! and renders a bootable-container build recipe: a Containerfile, a
//! mirrored configuration tree, reports, and a structured snapshot that
//! is the contract between the inspection and rendering halves.

// See https://doc.rust-lang.org/rustc/lints/listing/allowed-by-default.html
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

mod baseline;
pub mod cli;
pub(crate) mod hostexec;
mod inspect;
mod push;
mod redact;
mod render;
pub(crate) mod rpmq;
pub mod snapshot;
mod task;
mod validate;
mod warnings;
