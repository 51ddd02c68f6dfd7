//! 运维编排核心库：错误类型、配置、数据模型与各层接口定义

pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use errors::*;
pub use models::*;
pub use traits::*;
