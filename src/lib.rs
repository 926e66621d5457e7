#[macro_use]
extern crate tracing;

pub mod cmd;
pub mod config;
pub mod db;
pub mod errors;
pub mod logger;
pub mod models;
pub mod naming;
pub mod queue;
pub mod reconciler;
pub mod repository;
pub mod service;
pub mod values;
