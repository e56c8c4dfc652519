//! 流量分析模块
//!
//! 将 HTTP 查询参数校验为类型化查询，交由 ADX 或内存引擎执行并物化结果

pub mod engine;
pub mod memory;
pub mod model;
pub mod query;
pub mod scope;
pub mod window;
mod error;
mod handlers;
mod router;
mod types;

pub use engine::QueryEngine;
pub use memory::InMemoryEngine;
pub use router::{cors_layer, create_analytics_router};
