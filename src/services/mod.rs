pub mod config;
pub mod host;
pub mod navigation;
pub mod persistence;
pub mod reconcile;
pub mod session;
pub mod update_check;
