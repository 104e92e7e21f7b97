pub mod autodeploy;
pub mod db;
pub mod deployment_log;
pub mod layout;
pub mod ports;
pub mod projects;
pub mod settings;
