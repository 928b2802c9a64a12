pub mod errors;
pub mod ports;
pub mod status;
pub mod views;
