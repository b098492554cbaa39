#![forbid(unsafe_code)]

pub mod connection;
pub mod dispatch;
pub mod hub;
pub mod transport;

#[cfg(test)]
mod transport_tests;
