#[macro_use]
extern crate tracing;

pub mod activity_feed;
pub mod cmd;
pub mod config;
pub mod deploy_executor;
pub mod deployment_manager;
pub mod errors;
pub mod events;
pub mod job_monitor;
pub mod kubers_utils;
pub mod logger;
pub mod manifest;
pub mod models;
pub mod rbac;
pub mod release_reconciler;
pub mod runtime;
pub mod scheduler;
pub mod services;
mod string;
mod unit_conversion;
