pub mod config;
pub mod controller;
pub mod mqtt;
pub mod ui;
