use quarry_common::CatalogConfig;

pub const STOCK_CATALOG: &str = r#"
metrics:
  - name: stock_quote
    source_kind: http_json
    source_locator: http://feeds.local/quotes
    data_path: /data
    field_types:
      ticker: STRING
      name: STRING
  - name: stock_price
    source_kind: file_csv
    source_locator: /data/prices.csv
    field_types:
      ticker: STRING
      close: DOUBLE
      ts: TIMESTAMP
    column_alias:
      ticker: stkcode
  - name: stock_volume
    source_kind: file_csv
    source_locator: /data/volume.csv
    field_types:
      ticker: STRING
      volume: LONG
tables:
  - name: Stocks
    primary_keys: [ticker]
    field_to_metric:
      ticker: stock_quote
      name: stock_quote
      price: stock_price
      ts: stock_price
      volume: stock_volume
    field_to_physical:
      price: close
"#;

#[allow(dead_code)]
pub fn stock_catalog() -> CatalogConfig {
    CatalogConfig::from_yaml_str(STOCK_CATALOG).expect("fixture catalog is valid")
}
