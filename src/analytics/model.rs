//! 五分钟聚合视图的数据模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `mv_topTalkers_5m` / `mv_heatmap_5m` 中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlowBin {
    #[serde(alias = "TimeGenerated")]
    pub five_min_bin: DateTime<Utc>,
    pub src_vm: String,
    pub dst_vm: String,
    pub dst_port: u16,
    pub bytes: i64,
    /// 原始流记录没有 Flows 字段，按一条流计
    #[serde(default = "default_flows")]
    pub flows: i64,
}

fn default_flows() -> i64 {
    1
}
