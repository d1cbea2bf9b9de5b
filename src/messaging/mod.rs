pub mod fcm;
pub mod gateway;
pub mod log;
pub mod memory;
