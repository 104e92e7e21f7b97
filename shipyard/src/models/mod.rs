pub mod autodeploy;
pub mod deployment;
pub mod project;
