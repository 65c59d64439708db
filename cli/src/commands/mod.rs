//! Command implementations

pub mod bootstrap;
pub mod destroy;
pub mod provision;
pub mod version;
