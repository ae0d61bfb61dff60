//! Application services: the entity store, extension hooks, identity
//! assignment and authorization.

pub mod authz;
pub mod error;
pub mod hooks;
pub mod identity;
pub mod repos;
pub mod store;
