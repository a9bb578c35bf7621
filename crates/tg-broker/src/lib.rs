//! tg-broker: Local RPC broker
//!
//! The broker accepts caller connections on a local socket (and optional
//! TCP endpoints), authenticates them, spreads their RPC commands over a
//! pool of request workers and relays the responses. Commands that start
//! asynchronous tasks are tracked so that exactly one push notification
//! reaches the caller when the task finishes.

pub mod auth;
pub mod broker;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod sessions;
pub mod state;
pub mod tasks;
pub mod worker;

pub use broker::{Broker, BrokerHandle};
pub use client::{BrokerClient, Credentials, Incoming};
pub use config::BrokerConfig;
pub use error::BrokerError;
pub use state::BrokerState;
