//! Core data model types: addresses and resolved lists.

pub mod address;
pub mod list;
