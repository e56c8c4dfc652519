//! 查询引擎

use chrono::Utc;

use super::memory::InMemoryEngine;
use super::query::AggregationQuery;
use crate::kusto::{KustoClient, KustoError, ResultCursor};

/// 聚合查询的执行后端
pub enum QueryEngine {
    /// ADX 集群上的指定数据库
    Kusto {
        client: KustoClient,
        database: String,
    },
    /// 本地数据
    Memory(InMemoryEngine),
}

impl QueryEngine {
    pub fn kusto(client: KustoClient, database: impl Into<String>) -> Self {
        Self::Kusto {
            client,
            database: database.into(),
        }
    }

    /// 执行查询并返回结果游标
    pub async fn execute(&self, query: &AggregationQuery) -> Result<ResultCursor, KustoError> {
        match self {
            Self::Kusto { client, database } => {
                client.execute_query(database, &query.to_kql()).await
            }
            Self::Memory(engine) => Ok(engine.execute(query, Utc::now())),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Kusto { client, database } => {
                format!("ADX {} / {}", client.cluster_uri(), database)
            }
            Self::Memory(engine) => format!("内存引擎（{} 条记录）", engine.len()),
        }
    }
}
