pub mod cart_service;
pub mod checkout;
pub mod settlement;
pub mod sweeper;
