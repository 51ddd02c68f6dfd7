//! 运维编排接口客户端
//!
//! ```ignore
//! use std::time::Duration;
//! use operations_client::{OperationsClient, ReqwestTransport};
//! use operations_core::models::OperatorMeta;
//!
//! let transport = ReqwestTransport::new("http://127.0.0.1:8080", Duration::from_secs(10))?;
//! let client = OperationsClient::new(transport);
//! let result = client.deploy(vec![OperatorMeta::new(1, vec![10, 11])]).await?;
//! println!("{}: {:?}", result.message, result.task_ids);
//! ```

pub mod client;
pub mod transport;

pub use client::{OperationsClient, ReportAck};
pub use transport::{ApiRequest, Envelope, HttpMethod, ReqwestTransport, Transport};
