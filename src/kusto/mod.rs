//! Azure Data Explorer (Kusto) 查询客户端
//!
//! 提供查询执行、v2 响应解析与结果物化

pub mod client;
pub mod credential;
pub mod cursor;
pub mod error;
pub mod value;

pub use client::KustoClient;
pub use credential::{Credential, IdentityEndpoint, ManagedIdentity};
pub use cursor::{Column, ResultCursor};
pub use error::KustoError;
pub use value::{ColumnType, FlowAggregateRow, ScalarValue};
