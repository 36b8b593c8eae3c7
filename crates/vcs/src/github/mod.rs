//! GitHub backend for [`VcsProvider`](crate::VcsProvider).

pub mod client;
pub mod types;

pub use client::{Client, Error};
