pub mod analyse;
pub mod cfg;
pub mod dependencies;
pub mod error;
pub mod transform;
pub mod ty;
pub mod verify;
pub mod write;

mod core;

pub use self::core::*;
