pub mod sync;
pub mod system;
