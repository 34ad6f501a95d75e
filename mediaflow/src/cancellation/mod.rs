//! Cooperative shutdown for the worker loop.

mod token;

pub use token::CancellationToken;
