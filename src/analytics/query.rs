//! 聚合查询构建
//!
//! 每个接口一个构建函数，只接受已校验的类型化参数

use std::fmt::Write;

use super::scope::ScopePredicate;
use super::window::QueryWindow;

/// Top Talkers 物化视图
pub const TOP_TALKERS_VIEW: &str = "mv_topTalkers_5m";
/// 热力图物化视图
pub const HEATMAP_VIEW: &str = "mv_heatmap_5m";

/// Top Talkers 查询参数
#[derive(Debug, Clone, PartialEq)]
pub struct TopTalkersQuery {
    pub top: u32,
    pub scope: Option<ScopePredicate>,
    pub window: QueryWindow,
}

/// 热力图查询参数
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapQuery {
    pub top_sources: u32,
    pub top_dests: u32,
    pub window: QueryWindow,
}

/// 已校验的聚合查询
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationQuery {
    TopTalkers(TopTalkersQuery),
    Heatmap(HeatmapQuery),
}

impl AggregationQuery {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TopTalkers(_) => "top-talkers",
            Self::Heatmap(_) => "heatmap",
        }
    }

    pub fn to_kql(&self) -> String {
        match self {
            Self::TopTalkers(q) => top_talkers_kql(q),
            Self::Heatmap(q) => heatmap_kql(q),
        }
    }
}

/// 按 (SrcVm, DstVm, DstPort) 汇总字节数与流数，取字节数最大的 `top` 组
pub fn top_talkers_kql(query: &TopTalkersQuery) -> String {
    let mut kql = String::new();
    let _ = writeln!(kql, "let start = now() - {};", query.window.to_kql());
    let _ = writeln!(kql, "{}", TOP_TALKERS_VIEW);
    let _ = writeln!(kql, "| where FiveMinBin >= start");
    if let Some(ref scope) = query.scope {
        let _ = writeln!(kql, "| where {}", scope.to_kql());
    }
    let _ = writeln!(
        kql,
        "| summarize Bytes=sum(Bytes), Flows=sum(Flows) by SrcVm, DstVm, DstPort"
    );
    let _ = write!(kql, "| top {} by Bytes desc", query.top);
    kql
}

/// 两阶段聚合：先按 (SrcVm, DstVm) 汇总，再只保留源与目标都在各自 Top N 中的组合
///
/// 结果是适合直接渲染的稠密子矩阵，不是按联合流量排序的 Top N
pub fn heatmap_kql(query: &HeatmapQuery) -> String {
    let mut kql = String::new();
    let _ = writeln!(kql, "let start = now() - {};", query.window.to_kql());
    let _ = writeln!(kql, "let sums = {}", HEATMAP_VIEW);
    let _ = writeln!(kql, "| where FiveMinBin >= start");
    let _ = writeln!(kql, "| summarize Bytes=sum(Bytes) by SrcVm, DstVm;");
    let _ = writeln!(
        kql,
        "let topSrc = sums | summarize Bytes=sum(Bytes) by SrcVm | top {} by Bytes desc | project SrcVm;",
        query.top_sources
    );
    let _ = writeln!(
        kql,
        "let topDst = sums | summarize Bytes=sum(Bytes) by DstVm | top {} by Bytes desc | project DstVm;",
        query.top_dests
    );
    let _ = writeln!(kql, "sums");
    let _ = writeln!(kql, "| where SrcVm in (topSrc) and DstVm in (topDst)");
    let _ = write!(kql, "| project SrcVm, DstVm, Bytes");
    kql
}
