//! # Metrics
//!
//! A statsd style metrics client. Lines have the form
//! `<namespace>.<name>:<value>|<kind>`, where the kind is `ms` for timers and
//! `c` for counters.
//!
//! ```
//! use diagnostics::metrics::{LogTransport, MetricsClient};
//!
//! let client = MetricsClient::new("shop", LogTransport::default(), true);
//! client.counter("orders").unwrap().increment(1);
//! client.flush().unwrap();
//! ```
mod client;
mod instruments;
mod observer;
mod transport;

pub use client::MetricsClient;
pub use instruments::{Counter, Timer};
pub use observer::{MetricsObserver, MetricsObserverFactory};
pub use transport::{LogTransport, MetricsTransport, UdpTransport};
