//! EverLive Core Library
//!
//! This crate provides the real-time media orchestration engine for the
//! EverLive digital-human broadcast: packet transport, worker fan-out,
//! frame sources, the idle/talking pacer, and the store-and-forward
//! generation driver.

pub mod broadcast;
pub mod config;
pub mod generator;
pub mod interactor;
pub mod media;
pub mod queue;
pub mod telemetry;
pub mod transport;
