pub mod directory;
pub mod firebase;
pub mod memory;
