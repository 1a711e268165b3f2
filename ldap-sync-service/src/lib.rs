//! LDAP Sync Service - keeps per-user resource bundles in step with directory membership.

pub mod config;
pub mod controller;
pub mod error;
pub mod models;
pub mod services;
pub mod startup;
pub mod workers;
