//! Application wiring: builds every component, serves, and shuts down

pub mod app;

pub use app::Application;
