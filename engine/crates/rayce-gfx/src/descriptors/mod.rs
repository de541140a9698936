pub mod bindless;
pub mod layout;
pub mod pool;
pub mod registry;
pub mod write;
