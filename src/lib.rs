//! A preforking HTTP/1.0 application server (`spec.md` §1).
//!
//! A single manager process binds the listening socket, forks a fixed-size
//! worker pool, and supervises it via signals; each worker independently
//! accepts connections and drives the request/response cycle for a
//! user-supplied [`Application`].

pub mod app;
pub mod byteutils;
pub mod config;
pub mod environ;
pub mod error;
pub mod http;
pub mod logging;
pub mod manager;
pub mod stream;
pub mod worker;
pub mod worker_handle;

pub use app::Application;
pub use config::{Config, Listen};
pub use environ::Environment;
pub use http::StartResponse;
pub use manager::Manager;
