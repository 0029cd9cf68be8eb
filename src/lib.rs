pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod net_link;
pub mod protocol;
pub mod ui_bridge;
