//! Backend for the AI-Track transit app: risk scoring, vehicle registration,
//! route lookup and the one-shot user credential migration.

pub mod config;
pub mod error;
pub mod gateway;
pub mod migration;
pub mod scoring;
pub mod telemetry;
pub mod transit;
