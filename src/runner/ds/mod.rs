pub mod error;
pub mod handle;
pub mod stack;
pub mod value;
