//! gopack command-line interface.

pub mod commands;
