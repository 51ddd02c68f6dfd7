pub mod execution_backend;
pub mod log_store;
pub mod repository;

pub use execution_backend::*;
pub use log_store::*;
pub use repository::*;
