pub mod application;
pub mod bundle;
pub mod cache;
pub mod cli;
pub mod config;
pub mod exec_credential;
pub mod files;
pub mod gridscale;
pub mod kubeconfig;
