//! Utility modules for common functionality.
//!
//! Currently just logging setup shared by the binary and anything embedding
//! the library.

pub mod logger;
