pub mod backend;
pub mod process;
pub mod types;
