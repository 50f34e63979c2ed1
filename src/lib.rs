//! opsgate: a WebSocket gateway that puts a tool-calling LLM agent in
//! charge of day-to-day server operations.
//!
//! The model converses over a typed frame protocol, calls skills (Docker,
//! shell, system metrics, logs, PostgreSQL), and every risky action passes
//! a safety blocklist plus an explicit user confirmation handshake before
//! anything executes.

pub mod audit;
pub mod cli;
pub mod config;
pub mod gateway;
pub mod memory;
pub mod protocol;
pub mod provider;
pub mod router;
pub mod safety;
pub mod server;
pub mod session;
pub mod skill;
