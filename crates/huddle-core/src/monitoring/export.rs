//! Metric export in JSON and CSV.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::metric::{MetricPoint, MetricType};
use crate::error::{CoordinationError, Result};

/// Export format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = CoordinationError;

    /// Parses a format name, case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            _ => Err(CoordinationError::invalid_input(
                "format",
                format!("unsupported export format: {s}"),
            )),
        }
    }
}

/// One metric's points inside the export window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSeries {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub description: String,
    pub unit: String,
    pub current_value: f64,
    pub data_points: Vec<MetricPoint>,
}

/// Complete export document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsExport {
    pub export_timestamp: DateTime<Utc>,
    pub time_range_hours: u64,
    pub metrics: Vec<MetricSeries>,
}

/// Renders a metrics export.
pub trait MetricExporter {
    fn export(&self, export: &MetricsExport) -> Result<String>;
}

/// Pretty-printed JSON document.
pub struct JsonExporter;

impl MetricExporter for JsonExporter {
    fn export(&self, export: &MetricsExport) -> Result<String> {
        Ok(serde_json::to_string_pretty(export)?)
    }
}

/// One row per data point: `timestamp,metric_name,value,labels`.
///
/// Labels are written as a JSON object.
pub struct CsvExporter;

impl MetricExporter for CsvExporter {
    fn export(&self, export: &MetricsExport) -> Result<String> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        writer.write_record(["timestamp", "metric_name", "value", "labels"]).map_err(csv_error)?;

        for series in &export.metrics {
            for point in &series.data_points {
                writer
                    .write_record([
                        point.timestamp.to_rfc3339(),
                        series.name.clone(),
                        point.value.to_string(),
                        serde_json::to_string(&point.labels)?,
                    ])
                    .map_err(csv_error)?;
            }
        }

        let data = writer.into_inner().map_err(|e| CoordinationError::Io(e.into_error()))?;
        String::from_utf8(data).map_err(|e| {
            CoordinationError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }
}

fn csv_error(e: csv::Error) -> CoordinationError {
    CoordinationError::Io(e.into())
}

/// Exporter for a format.
#[must_use]
pub fn exporter_for(format: ExportFormat) -> Box<dyn MetricExporter> {
    match format {
        ExportFormat::Json => Box::new(JsonExporter),
        ExportFormat::Csv => Box::new(CsvExporter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample() -> MetricsExport {
        let point = MetricPoint {
            timestamp: Utc::now(),
            value: 42.5,
            labels: BTreeMap::from([("worker_id".to_string(), "w1".to_string())]),
        };
        MetricsExport {
            export_timestamp: Utc::now(),
            time_range_hours: 1,
            metrics: vec![MetricSeries {
                name: "error_rate".to_string(),
                metric_type: MetricType::Gauge,
                description: "Error rate percentage".to_string(),
                unit: "%".to_string(),
                current_value: 42.5,
                data_points: vec![point],
            }],
        }
    }

    #[test]
    fn test_csv_header_and_quoted_labels() {
        let csv = CsvExporter.export(&sample()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("timestamp,metric_name,value,labels"));
        let row = lines.next().unwrap();
        assert!(row.contains(",error_rate,42.5,"));
        assert!(row.ends_with(r#""{""worker_id"":""w1""}""#));
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_json_export_is_structured() {
        let json = JsonExporter.export(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["metrics"][0]["type"], "gauge");
        assert_eq!(value["metrics"][0]["data_points"][0]["labels"]["worker_id"], "w1");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        let err = "xml".parse::<ExportFormat>().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }
}
