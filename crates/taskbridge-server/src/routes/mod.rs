//! Route modules for the taskbridge ingress server.

pub mod health;
pub mod process;
pub mod webhooks;
