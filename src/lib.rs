#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod error;
pub mod events;
pub mod protocol;
pub mod types;
pub mod ws;

pub use crate::ws::{ConnectionManager, ConnectionState};

pub type Result<T> = std::result::Result<T, error::Error>;
