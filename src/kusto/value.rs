//! 查询结果的列类型、标量值与行

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

/// 引擎声明的列类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Int,
    Long,
    Real,
    Decimal,
    String,
    Guid,
    DateTime,
    Timespan,
    Dynamic,
}

impl ColumnType {
    /// 解析 v2 响应中的 `ColumnType`，未知类型按 dynamic 原样透传
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Self::Bool,
            "int" | "int32" => Self::Int,
            "long" | "int64" => Self::Long,
            "real" | "double" => Self::Real,
            "decimal" => Self::Decimal,
            "string" => Self::String,
            "guid" | "uniqueid" => Self::Guid,
            "datetime" | "date" => Self::DateTime,
            "timespan" | "time" => Self::Timespan,
            _ => Self::Dynamic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Long => "long",
            Self::Real => "real",
            Self::Decimal => "decimal",
            Self::String => "string",
            Self::Guid => "guid",
            Self::DateTime => "datetime",
            Self::Timespan => "timespan",
            Self::Dynamic => "dynamic",
        }
    }

    /// 按声明类型解码单元格
    pub fn decode(&self, cell: Value) -> Result<ScalarValue, String> {
        if cell.is_null() {
            return Ok(ScalarValue::Null);
        }

        let decoded = match (self, &cell) {
            (Self::Bool, Value::Bool(b)) => Some(ScalarValue::Bool(*b)),
            (Self::Bool, Value::Number(n)) => n.as_i64().map(|v| ScalarValue::Bool(v != 0)),
            (Self::Int | Self::Long, Value::Number(n)) => n.as_i64().map(ScalarValue::Long),
            (Self::Int | Self::Long, Value::String(s)) => s.parse().ok().map(ScalarValue::Long),
            (Self::Real, Value::Number(n)) => n.as_f64().map(ScalarValue::Real),
            // NaN / Infinity 以字符串形式下发
            (Self::Real, Value::String(s)) => s.parse().ok().map(ScalarValue::Real),
            (Self::Decimal, Value::String(s)) => Some(ScalarValue::String(s.clone())),
            (Self::Decimal, Value::Number(n)) => n.as_f64().map(ScalarValue::Real),
            (Self::String | Self::Guid, Value::String(s)) => Some(ScalarValue::String(s.clone())),
            (Self::DateTime, Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| ScalarValue::DateTime(dt.with_timezone(&Utc))),
            (Self::Timespan, Value::String(s)) => Some(ScalarValue::Timespan(s.clone())),
            (Self::Dynamic, _) => Some(ScalarValue::Dynamic(cell.clone())),
            _ => None,
        };

        decoded.ok_or_else(|| format!("cannot decode {} as {}", cell, self.as_str()))
    }
}

/// 单元格值
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Long(i64),
    Real(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Timespan(String),
    Dynamic(Value),
}

impl ScalarValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// 一行聚合结果：按引擎声明顺序排列的 (列名, 值)
///
/// 同一游标产生的所有行共享一份列名
#[derive(Debug, Clone, PartialEq)]
pub struct FlowAggregateRow {
    columns: Arc<[String]>,
    values: Vec<ScalarValue>,
}

impl FlowAggregateRow {
    pub(crate) fn new(columns: Arc<[String]>, values: Vec<ScalarValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// 按列名取值
    pub fn get(&self, column: &str) -> Option<&ScalarValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScalarValue)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for FlowAggregateRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_column_types() {
        assert_eq!(ColumnType::parse("long"), ColumnType::Long);
        assert_eq!(ColumnType::parse("Int64"), ColumnType::Long);
        assert_eq!(ColumnType::parse("datetime"), ColumnType::DateTime);
        assert_eq!(ColumnType::parse("SomethingNew"), ColumnType::Dynamic);
    }

    #[test]
    fn test_decode_typed_cells() {
        assert_eq!(ColumnType::Long.decode(json!(1000)), Ok(ScalarValue::Long(1000)));
        assert_eq!(ColumnType::Int.decode(json!(443)), Ok(ScalarValue::Long(443)));
        assert_eq!(ColumnType::Real.decode(json!("NaN")).map(|v| matches!(v, ScalarValue::Real(f) if f.is_nan())), Ok(true));
        assert_eq!(
            ColumnType::String.decode(json!("vm01")),
            Ok(ScalarValue::String("vm01".to_string()))
        );
        assert_eq!(ColumnType::Long.decode(Value::Null), Ok(ScalarValue::Null));

        let dt = ColumnType::DateTime
            .decode(json!("2026-10-18T10:05:00Z"))
            .unwrap();
        match dt {
            ScalarValue::DateTime(t) => assert_eq!(t.to_rfc3339(), "2026-10-18T10:05:00+00:00"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_type_mismatch() {
        assert!(ColumnType::Long.decode(json!("vm01")).is_err());
        assert!(ColumnType::String.decode(json!(12)).is_err());
        assert!(ColumnType::DateTime.decode(json!("yesterday")).is_err());
    }

    #[test]
    fn test_row_serializes_in_column_order() {
        let columns: Arc<[String]> = vec!["SrcVm".to_string(), "DstVm".to_string(), "Bytes".to_string()].into();
        let row = FlowAggregateRow::new(
            columns,
            vec![
                ScalarValue::String("vm01".to_string()),
                ScalarValue::String("vm02".to_string()),
                ScalarValue::Long(1000),
            ],
        );

        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"SrcVm":"vm01","DstVm":"vm02","Bytes":1000}"#);
        assert_eq!(row.get("Bytes").and_then(ScalarValue::as_i64), Some(1000));
        assert!(row.get("Flows").is_none());
    }
}
