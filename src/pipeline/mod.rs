pub mod follow;
pub mod thumbnail;
