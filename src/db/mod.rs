pub mod local;
pub mod memory;
pub mod models;
pub mod ports;
pub mod sam;
