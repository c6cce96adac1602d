pub mod config;
pub mod goal;
pub mod settings;
pub mod stats;
pub mod timer;
pub mod watchdog;
