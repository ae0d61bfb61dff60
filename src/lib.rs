//! Entity persistence, cache and authorization core shared by every tenant module.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod modules;
