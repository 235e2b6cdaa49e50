//! The tankcheck command line interface (CLI) crate.
//!
//! This crate implements the tankcheck command line tools.

#![deny(missing_docs)]

pub mod commands;
