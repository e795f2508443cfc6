//! Realtime chat session core for the ResQ emergency-contact app.

pub mod capture;
pub mod config;
pub mod controller;
pub mod logging;
pub mod message;
pub mod protocol;
pub mod timeline;
pub mod transport;
