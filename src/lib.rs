#![forbid(unsafe_code)]

//! Async client for the Yate external module protocol.
//!
//! An external application connects to the engine over TCP or standard
//! input/output, injects messages, queries engine parameters, and receives
//! the messages it watches or handles. See [`client::Client`].

pub mod client;
pub mod config;
pub mod errors;
pub mod wire;

pub use client::{Client, ClientBuilder, ClientOptions, DispatchMode};
pub use config::ClientConfig;
pub use errors::{ClientError, Result};
pub use wire::directive::{CorrelationKey, Directive};
pub use wire::message::{
    InstallRequest, InstallResult, LocalSetting, MessageEvent, MessageResponse, Role, TypedMessage,
};
