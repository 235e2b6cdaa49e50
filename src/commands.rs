//! The module for the tankcheck CLI commands.

mod check;
mod compare;
mod inputs;

pub use self::{check::*, compare::*, inputs::*};
