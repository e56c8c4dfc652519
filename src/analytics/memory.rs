//! 内存查询引擎
//!
//! 在本地 FlowBin 数据上按与 KQL 相同的语义求值，用于离线运行与测试

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use super::model::FlowBin;
use super::query::{AggregationQuery, HeatmapQuery, TopTalkersQuery};
use super::window::QueryWindow;
use crate::kusto::{Column, ColumnType, ResultCursor};

pub struct InMemoryEngine {
    bins: Vec<FlowBin>,
}

impl InMemoryEngine {
    pub fn new(bins: Vec<FlowBin>) -> Self {
        Self { bins }
    }

    /// 从 JSON 数组文件加载
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("读取数据文件失败: {}", path.display()))?;
        let bins: Vec<FlowBin> = serde_json::from_str(&content)
            .with_context(|| format!("解析数据文件失败: {}", path.display()))?;
        Ok(Self::new(bins))
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// 以 `now` 为当前时间执行查询
    pub fn execute(&self, query: &AggregationQuery, now: DateTime<Utc>) -> ResultCursor {
        match query {
            AggregationQuery::TopTalkers(q) => self.top_talkers(q, now),
            AggregationQuery::Heatmap(q) => self.heatmap(q, now),
        }
    }

    fn in_window(&self, start: DateTime<Utc>) -> impl Iterator<Item = &FlowBin> {
        self.bins.iter().filter(move |b| b.five_min_bin >= start)
    }

    fn top_talkers(&self, query: &TopTalkersQuery, now: DateTime<Utc>) -> ResultCursor {
        let start = window_start(now, &query.window);

        let mut groups: BTreeMap<(&str, &str, u16), (i64, i64)> = BTreeMap::new();
        for bin in self.in_window(start) {
            if let Some(ref scope) = query.scope {
                if !scope.matches(bin) {
                    continue;
                }
            }
            let entry = groups
                .entry((bin.src_vm.as_str(), bin.dst_vm.as_str(), bin.dst_port))
                .or_default();
            entry.0 = entry.0.saturating_add(bin.bytes);
            entry.1 = entry.1.saturating_add(bin.flows);
        }

        let mut ranked: Vec<_> = groups.into_iter().collect();
        ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0));
        ranked.truncate(query.top as usize);

        let rows = ranked
            .into_iter()
            .map(|((src, dst, port), (bytes, flows))| json!([src, dst, port, bytes, flows]))
            .collect();

        ResultCursor::new(
            vec![
                Column::new("SrcVm", ColumnType::String),
                Column::new("DstVm", ColumnType::String),
                Column::new("DstPort", ColumnType::Int),
                Column::new("Bytes", ColumnType::Long),
                Column::new("Flows", ColumnType::Long),
            ],
            rows,
        )
    }

    fn heatmap(&self, query: &HeatmapQuery, now: DateTime<Utc>) -> ResultCursor {
        let start = window_start(now, &query.window);

        let mut sums: BTreeMap<(&str, &str), i64> = BTreeMap::new();
        for bin in self.in_window(start) {
            let sum = sums
                .entry((bin.src_vm.as_str(), bin.dst_vm.as_str()))
                .or_default();
            *sum = sum.saturating_add(bin.bytes);
        }

        let mut by_src: BTreeMap<&str, i64> = BTreeMap::new();
        let mut by_dst: BTreeMap<&str, i64> = BTreeMap::new();
        for (&(src, dst), &bytes) in &sums {
            let total = by_src.entry(src).or_default();
            *total = total.saturating_add(bytes);
            let total = by_dst.entry(dst).or_default();
            *total = total.saturating_add(bytes);
        }

        let top_src = top_keys(by_src, query.top_sources);
        let top_dst = top_keys(by_dst, query.top_dests);

        let rows: Vec<Value> = sums
            .into_iter()
            .filter(|((src, dst), _)| top_src.contains(src) && top_dst.contains(dst))
            .map(|((src, dst), bytes)| json!([src, dst, bytes]))
            .collect();

        ResultCursor::new(
            vec![
                Column::new("SrcVm", ColumnType::String),
                Column::new("DstVm", ColumnType::String),
                Column::new("Bytes", ColumnType::Long),
            ],
            rows,
        )
    }
}

/// 窗口起点，早于可表示范围时取最早时间
fn window_start(now: DateTime<Utc>, window: &QueryWindow) -> DateTime<Utc> {
    now.checked_sub_signed(window.duration())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// 按字节数降序取前 n 个键
fn top_keys(marginals: BTreeMap<&str, i64>, n: u32) -> HashSet<&str> {
    let mut ranked: Vec<_> = marginals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
        .into_iter()
        .take(n as usize)
        .map(|(key, _)| key)
        .collect()
}
