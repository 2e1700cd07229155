pub mod config;
pub mod controller;
pub mod drive;
pub mod hw;
pub mod messages;
pub mod runtime;
pub mod sensor;
pub mod servo;
pub mod telemetry;
