//! AI gateway - a transparent reverse proxy for AI HTTP APIs
//!
//! Every exchange passing through is recorded (request, response, binary
//! artifacts). With approval mode on, requests wait for an operator to
//! approve them or to substitute a canned provider-shaped error.

pub mod api;
pub mod application;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod providers;
pub mod proxy;

pub use application::Application;
pub use error::{Error, Result};
