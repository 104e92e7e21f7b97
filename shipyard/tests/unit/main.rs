//! Integration tests of the deployment engine against in-memory collaborators

mod common;
mod test_executor;
mod test_scheduler;
mod test_server;
mod test_webhook;
