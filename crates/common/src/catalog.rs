//! YAML catalog of metrics and the logical tables composed from them.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use quarry_error::{ErrorCode, ErrorContext, QuarryError, Result};

use crate::models::{LogicalTableDefinition, MetricDescriptor};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub metrics: Vec<MetricDescriptor>,
    #[serde(default)]
    pub tables: Vec<LogicalTableDefinition>,
}

impl CatalogConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            QuarryError::new(
                ErrorCode::MissingRequiredField,
                format!("cannot read catalog {}: {}", path.display(), e),
            )
            .with_context(ErrorContext::Config {
                file_path: Some(path.display().to_string()),
                field: None,
            })
        })?;
        Self::from_yaml_str(&content).map_err(|e| {
            e.with_context(ErrorContext::Config {
                file_path: Some(path.display().to_string()),
                field: None,
            })
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let catalog: CatalogConfig = serde_yaml::from_str(content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Cross-checks tables against the metrics they reference.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for metric in &self.metrics {
            metric.validate()?;
            if !names.insert(metric.name.as_str()) {
                return Err(QuarryError::new(
                    ErrorCode::SchemaViolation,
                    format!("metric '{}' is defined more than once", metric.name),
                ));
            }
        }

        let mut tables = HashSet::new();
        for table in &self.tables {
            table.validate()?;
            if !tables.insert(table.name.to_lowercase()) {
                return Err(QuarryError::new(
                    ErrorCode::SchemaViolation,
                    format!("table '{}' is defined more than once", table.name),
                ));
            }
            for (field, metric_name) in &table.field_to_metric {
                let metric = self
                    .metrics
                    .iter()
                    .find(|m| &m.name == metric_name)
                    .ok_or_else(|| {
                        QuarryError::new(
                            ErrorCode::SchemaViolation,
                            format!(
                                "field '{}' of table '{}' references unknown metric '{}'",
                                field, table.name, metric_name
                            ),
                        )
                    })?;
                let column = table.physical_column(field);
                if !metric.declares(column) {
                    return Err(QuarryError::new(
                        ErrorCode::SchemaViolation,
                        format!(
                            "field '{}' of table '{}' maps to column '{}' which metric '{}' does not declare",
                            field, table.name, column, metric.name
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CATALOG: &str = r#"
metrics:
  - name: stock_price
    source_kind: file_csv
    source_locator: /data/prices.csv
    field_types:
      ticker: STRING
      timestamp: TIMESTAMP
      close: DOUBLE
tables:
  - name: Quotes
    primary_keys: [ticker]
    field_to_metric:
      ticker: stock_price
      close: stock_price
"#;

    #[test]
    fn test_load_catalog_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();

        let catalog = CatalogConfig::from_file(file.path()).unwrap();
        assert_eq!(catalog.metrics.len(), 1);
        assert_eq!(catalog.tables[0].name, "Quotes");
    }

    #[test]
    fn test_unknown_metric_reference_is_rejected() {
        let yaml = CATALOG.replace("close: stock_price", "close: stock_close");
        let err = CatalogConfig::from_yaml_str(&yaml).unwrap_err();
        assert_eq!(err.code, ErrorCode::SchemaViolation);
        assert!(err.message.contains("stock_close"));
    }

    #[test]
    fn test_undeclared_physical_column_is_rejected() {
        let yaml = CATALOG.replace("close: stock_price", "price: stock_price");
        let err = CatalogConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(err.message.contains("'price'"));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = CatalogConfig::from_yaml_str("metrics: [").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidYaml);
    }

    #[test]
    fn test_missing_file() {
        let err = CatalogConfig::from_file("/nonexistent/catalog.yaml").unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingRequiredField);
    }
}
