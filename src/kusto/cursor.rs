//! v2 查询响应解析与结果物化
//!
//! ADX v2 REST 接口返回一个 frame 数组：
//! `DataSetHeader`、若干 `DataTable`（其中 `TableKind == "PrimaryResult"` 为查询结果）、
//! 以及最终的 `DataSetCompletion`。

use std::sync::Arc;
use std::vec;

use serde::Deserialize;
use serde_json::Value;

use super::error::KustoError;
use super::value::{ColumnType, FlowAggregateRow};

/// 结果列元数据
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "FrameType")]
enum Frame {
    #[serde(rename_all = "PascalCase")]
    DataTable {
        #[serde(default)]
        table_kind: String,
        #[serde(default)]
        columns: Vec<RawColumn>,
        #[serde(default)]
        rows: Vec<Value>,
    },
    #[serde(rename_all = "PascalCase")]
    DataSetCompletion {
        #[serde(default)]
        has_errors: bool,
        #[serde(default)]
        cancelled: bool,
        #[serde(default)]
        one_api_errors: Vec<Value>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawColumn {
    column_name: String,
    #[serde(default)]
    column_type: Option<String>,
    #[serde(default)]
    data_type: Option<String>,
}

/// 从 OneApi 错误对象中提取可读信息
///
/// 优先使用 `@message`（包含具体诊断），其次 `message`
pub(crate) fn one_api_message(error: &Value) -> Option<String> {
    let inner = error.get("error").unwrap_or(error);
    inner
        .get("@message")
        .or_else(|| inner.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// 查询结果游标
///
/// 只能被消费一次：`into_rows` 获取所有权
#[derive(Debug)]
pub struct ResultCursor {
    columns: Vec<Column>,
    rows: Vec<Value>,
}

impl ResultCursor {
    pub fn new(columns: Vec<Column>, rows: Vec<Value>) -> Self {
        Self { columns, rows }
    }

    /// 解析 v2 响应体
    pub fn from_v2_response(body: &[u8]) -> Result<Self, KustoError> {
        let frames: Vec<Frame> =
            serde_json::from_slice(body).map_err(|e| KustoError::Protocol(e.to_string()))?;

        let mut primary = None;
        for frame in frames {
            match frame {
                Frame::DataTable {
                    table_kind,
                    columns,
                    rows,
                } if table_kind == "PrimaryResult" && primary.is_none() => {
                    let columns = columns
                        .into_iter()
                        .map(|c| {
                            let ty = c.column_type.or(c.data_type).unwrap_or_default();
                            Column::new(c.column_name, ColumnType::parse(&ty))
                        })
                        .collect();
                    primary = Some(Self::new(columns, rows));
                }
                Frame::DataSetCompletion {
                    has_errors,
                    cancelled,
                    one_api_errors,
                } => {
                    if cancelled {
                        return Err(KustoError::Query("query was cancelled".to_string()));
                    }
                    if has_errors {
                        let messages: Vec<String> =
                            one_api_errors.iter().filter_map(one_api_message).collect();
                        let message = if messages.is_empty() {
                            "query completed with errors".to_string()
                        } else {
                            messages.join("; ")
                        };
                        return Err(KustoError::Query(message));
                    }
                }
                _ => {}
            }
        }

        primary.ok_or_else(|| KustoError::Protocol("response has no PrimaryResult table".to_string()))
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// 转为惰性行迭代器
    pub fn into_rows(self) -> Rows {
        let names: Arc<[String]> = self.columns.iter().map(|c| c.name.clone()).collect();
        let types = self.columns.iter().map(|c| c.column_type).collect();
        Rows {
            names,
            types,
            inner: self.rows.into_iter(),
        }
    }

    /// 完整读取所有行；任意一行失败则整体失败，不返回部分结果
    pub fn materialize(self) -> Result<Vec<FlowAggregateRow>, KustoError> {
        self.into_rows().collect()
    }
}

/// 惰性行迭代器，列名与类型在创建时读取一次
#[derive(Debug)]
pub struct Rows {
    names: Arc<[String]>,
    types: Vec<ColumnType>,
    inner: vec::IntoIter<Value>,
}

impl Rows {
    fn decode(&self, raw: Value) -> Result<FlowAggregateRow, KustoError> {
        let cells = match raw {
            Value::Array(cells) => cells,
            // 行内错误对象：查询在产出部分结果后失败
            Value::Object(obj) => {
                let message = obj
                    .get("OneApiErrors")
                    .and_then(Value::as_array)
                    .and_then(|errors| errors.iter().find_map(one_api_message))
                    .unwrap_or_else(|| "query failed while streaming results".to_string());
                return Err(KustoError::Query(message));
            }
            other => {
                return Err(KustoError::Protocol(format!("unexpected row: {}", other)));
            }
        };

        if cells.len() != self.types.len() {
            return Err(KustoError::Protocol(format!(
                "row has {} cells but {} columns were declared",
                cells.len(),
                self.types.len()
            )));
        }

        let values = cells
            .into_iter()
            .zip(self.types.iter())
            .zip(self.names.iter())
            .map(|((cell, ty), name)| {
                ty.decode(cell)
                    .map_err(|e| KustoError::Protocol(format!("column {}: {}", name, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FlowAggregateRow::new(self.names.clone(), values))
    }
}

impl Iterator for Rows {
    type Item = Result<FlowAggregateRow, KustoError>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.inner.next()?;
        Some(self.decode(raw))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
