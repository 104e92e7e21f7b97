//! Composition document hardening
//!
//! Parsing, security validation and the multi-tenant rewrite of user-supplied
//! Compose documents.

pub mod classifier;
pub mod document;
pub mod importer;
pub mod transformer;
pub mod validator;
