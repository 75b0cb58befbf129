//! Session registry
//!
//! This module handles:
//! - Session lifecycle (create, get, remove)
//! - Status transitions
//! - Change notifications for observers

mod registry;

pub use registry::{RegistryChange, SessionRegistry};
