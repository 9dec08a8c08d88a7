use std::path::Path;
use std::sync::Arc;

use quarry_common::config::{CacheSettings, EngineSettings, FetchSettings};
use quarry_common::{CatalogConfig, Scalar};
use quarry_connectors::default_registry;
use quarry_error::ErrorCode;
use quarry_runtime::{FederationEngine, FederationEngineOptions, TableRegistry};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write(dir: &Path, name: &str, contents: &str) -> String {
    let file = dir.join(name);
    std::fs::write(&file, contents).unwrap();
    file.display().to_string()
}

fn engine(catalog_yaml: &str) -> anyhow::Result<FederationEngine> {
    let catalog = CatalogConfig::from_yaml_str(catalog_yaml)?;
    Ok(FederationEngine::new(FederationEngineOptions {
        registry: Arc::new(TableRegistry::new(catalog)?),
        loaders: Arc::new(default_registry(&FetchSettings::default())?),
        engine: EngineSettings::default(),
        cache: CacheSettings::default(),
    }))
}

fn market_catalog(prices: &str, volumes: &str) -> String {
    format!(
        r#"
metrics:
  - name: stock_price
    source_kind: file_csv
    source_locator: {prices}
    field_types: {{ ticker: STRING, timestamp: TIMESTAMP, close: DOUBLE }}
  - name: stock_volume
    source_kind: file_csv
    source_locator: {volumes}
    field_types: {{ ticker: STRING, timestamp: TIMESTAMP, volume: LONG }}
tables:
  - name: market
    primary_keys: [ticker, timestamp]
    field_to_metric:
      ticker: stock_price
      timestamp: stock_price
      close: stock_price
      volume: stock_volume
"#
    )
}

fn market_engine(dir: &Path) -> anyhow::Result<FederationEngine> {
    let prices = write(
        dir,
        "prices.csv",
        "ticker,timestamp,close\nAAPL,1000,10.5\nMSFT,1000,20.0\n",
    );
    let volumes = write(
        dir,
        "volumes.csv",
        "ticker,timestamp,volume\nAAPL,1000,700\nGOOG,1000,900\n",
    );
    engine(&market_catalog(&prices, &volumes))
}

#[tokio::test]
async fn test_join_keeps_only_rows_present_in_every_metric() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = market_engine(dir.path())?;

    let result = engine.execute_query("SELECT * FROM market").await?;
    assert_eq!(
        result.column_names(),
        vec!["ticker", "timestamp", "close", "volume"]
    );
    assert_eq!(result.row_count(), 1);
    assert_eq!(
        result.row(0),
        vec![
            Some(Scalar::Utf8("AAPL".into())),
            Some(Scalar::TimestampMillis(1000)),
            Some(Scalar::Float64(10.5)),
            Some(Scalar::Int64(700)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_residual_predicates_filter_after_join() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = market_engine(dir.path())?;

    let kept = engine
        .execute_query("SELECT ticker FROM market WHERE volume >= 700")
        .await?;
    assert_eq!(kept.row_count(), 1);

    let dropped = engine
        .execute_query("SELECT ticker FROM market WHERE close < 10")
        .await?;
    assert_eq!(dropped.row_count(), 0);
    assert_eq!(dropped.column_names(), vec!["ticker"]);
    Ok(())
}

#[tokio::test]
async fn test_pushdown_matches_unfiltered_then_filtered() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = market_engine(dir.path())?;

    let pushed = engine
        .execute_query("SELECT ticker, close FROM market WHERE ticker = 'MSFT'")
        .await?;
    let all = engine.execute_query("SELECT ticker, close FROM market").await?;
    let expected = (0..all.row_count())
        .filter(|&r| all.get_column("ticker").unwrap().str_value(r) == Some("MSFT"))
        .count();
    assert_eq!(pushed.row_count(), expected);
    Ok(())
}

#[tokio::test]
async fn test_equality_is_pushed_into_the_fetch_url() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prices"))
        .and(query_param("ticker", "AAPL"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"rows":[{"ticker":"AAPL","price":189.5}]}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(&format!(
        r#"
metrics:
  - name: stock_price
    source_kind: http_json
    source_locator: {}/prices
    data_path: /rows
    field_types: {{ ticker: STRING, price: DOUBLE }}
tables:
  - name: t
    primary_keys: [ticker]
    field_to_metric: {{ ticker: stock_price, price: stock_price }}
"#,
        server.uri()
    ))?;

    let result = engine
        .execute_query("SELECT price FROM t WHERE ticker='AAPL'")
        .await?;
    assert_eq!(result.column_names(), vec!["price"]);
    assert_eq!(result.get_column("price").unwrap().f64_value(0), Some(189.5));

    // Served from the query cache; the mock still sees a single request.
    let again = engine
        .execute_query("SELECT price FROM t WHERE ticker='AAPL'")
        .await?;
    assert!(Arc::ptr_eq(&result, &again));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_identical_queries_fetch_once() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/volume"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("id,volume\n1,10\n2,20\n")
                .set_delay(std::time::Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(&format!(
        r#"
metrics:
  - name: volume
    source_kind: http_csv
    source_locator: {}/volume
    field_types: {{ id: LONG, volume: LONG }}
tables:
  - name: v
    primary_keys: [id]
    field_to_metric: {{ id: volume, volume: volume }}
"#,
        server.uri()
    ))?;

    let (a, b, c) = tokio::join!(
        engine.execute_query("SELECT volume FROM v"),
        engine.execute_query("SELECT volume FROM v"),
        engine.execute_query("SELECT id, volume FROM v"),
    );
    let (a, b, c) = (a?, b?, c?);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(c.row_count(), 2);
    assert_eq!(engine.active_queries(), 0);
    Ok(())
}

#[tokio::test]
async fn test_failed_load_fails_query_and_is_not_cached() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("id\n1\n"))
        .mount(&server)
        .await;

    let engine = engine(&format!(
        r#"
metrics:
  - name: flaky
    source_kind: http_csv
    source_locator: {}/flaky
    field_types: {{ id: LONG }}
tables:
  - name: f
    primary_keys: [id]
    field_to_metric: {{ id: flaky }}
"#,
        server.uri()
    ))?;

    let err = engine.execute_query("SELECT id FROM f").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::SourceUnavailable);
    assert_eq!(err.http_status(), 500);

    let ok = engine.execute_query("SELECT id FROM f").await?;
    assert_eq!(ok.row_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_metric_data_filter_and_fallback() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = market_engine(dir.path())?;

    let all = engine.metric_data("stock_price", None).await?;
    assert_eq!(all.row_count(), 2);

    let filtered = engine
        .metric_data("stock_price", Some("ticker == 'MSFT'"))
        .await?;
    assert_eq!(filtered.row_count(), 1);

    // Unknown column: warn and fall back to the whole table.
    let fallback = engine
        .metric_data("stock_price", Some("sector == 'tech'"))
        .await?;
    assert_eq!(fallback.row_count(), 2);

    let err = engine.metric_data("stock_prize", None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::MetricNotFound);
    assert_eq!(err.http_status(), 404);
    assert_eq!(err.hint.as_deref(), Some("Did you mean 'stock_price'?"));
    Ok(())
}

#[tokio::test]
async fn test_refresh_clears_caches_and_swaps_catalog() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = market_engine(dir.path())?;
    engine.execute_query("SELECT * FROM market").await?;
    assert!(engine.metric_cache().release_count() == 0);

    let prices = write(dir.path(), "prices2.csv", "ticker,timestamp,close\nAAPL,1000,11\n");
    let volumes = dir.path().join("volumes.csv").display().to_string();
    let renamed = market_catalog(&prices, &volumes).replace("name: market", "name: quotes");
    engine
        .refresh(CatalogConfig::from_yaml_str(&renamed)?)
        .await?;

    assert_eq!(engine.metric_cache().release_count(), 2);
    assert_eq!(engine.query_cache().release_count(), 1);

    let err = engine.execute_query("SELECT * FROM market").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::TableNotFound);

    let result = engine.execute_query("SELECT close FROM quotes").await?;
    assert_eq!(result.get_column("close").unwrap().f64_value(0), Some(11.0));
    Ok(())
}

fn shared_column_engine(dir: &Path) -> anyhow::Result<FederationEngine> {
    let prices = write(dir, "close.csv", "ticker,close\nAAPL,100.0\nMSFT,70.0\n");
    let adjusted = write(dir, "adjusted.csv", "ticker,close\nAAPL,55.5\nMSFT,65.0\n");
    engine(&format!(
        r#"
metrics:
  - name: price
    source_kind: file_csv
    source_locator: {prices}
    field_types: {{ ticker: STRING, close: DOUBLE }}
  - name: adjusted
    source_kind: file_csv
    source_locator: {adjusted}
    field_types: {{ ticker: STRING, close: DOUBLE }}
tables:
  - name: quotes
    primary_keys: [ticker]
    field_to_metric:
      ticker: price
      close: price
      adj_close: adjusted
    field_to_physical:
      adj_close: close
"#
    ))
}

#[tokio::test]
async fn test_fields_sharing_a_physical_column_stay_distinct() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = shared_column_engine(dir.path())?;

    let result = engine
        .execute_query("SELECT ticker, close, adj_close FROM quotes")
        .await?;
    assert_eq!(result.column_names(), vec!["ticker", "close", "adj_close"]);
    assert_eq!(
        result.row(0),
        vec![
            Some(Scalar::Utf8("AAPL".into())),
            Some(Scalar::Float64(100.0)),
            Some(Scalar::Float64(55.5)),
        ]
    );

    let adjusted_only = engine
        .execute_query("SELECT adj_close FROM quotes WHERE ticker = 'AAPL'")
        .await?;
    assert_eq!(adjusted_only.row(0), vec![Some(Scalar::Float64(55.5))]);
    Ok(())
}

#[tokio::test]
async fn test_residual_filter_reads_the_aliased_field() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = shared_column_engine(dir.path())?;

    let cheap = engine
        .execute_query("SELECT ticker, adj_close FROM quotes WHERE adj_close < 60")
        .await?;
    assert_eq!(cheap.row_count(), 1);
    assert_eq!(
        cheap.row(0),
        vec![Some(Scalar::Utf8("AAPL".into())), Some(Scalar::Float64(55.5))]
    );

    let by_close = engine
        .execute_query("SELECT ticker FROM quotes WHERE close < 60 AND adj_close < 100")
        .await?;
    assert_eq!(by_close.row_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_abandoned_query_is_no_longer_active() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("id\n1\n")
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let engine = engine(&format!(
        r#"
metrics:
  - name: slow
    source_kind: http_csv
    source_locator: {}/slow
    field_types: {{ id: LONG }}
tables:
  - name: s
    primary_keys: [id]
    field_to_metric: {{ id: slow }}
"#,
        server.uri()
    ))?;

    let outcome = tokio::time::timeout(
        std::time::Duration::from_millis(100),
        engine.execute_query("SELECT id FROM s"),
    )
    .await;
    assert!(outcome.is_err());
    assert_eq!(engine.active_queries(), 0);
    Ok(())
}
