mod common;

use anyhow::Result;
use quarry_common::{Predicate, Scalar};
use quarry_sql::{compile, plan_loads};

#[test]
fn test_driver_is_first_selected_metric() -> Result<()> {
    let catalog = common::stock_catalog();
    let plan = compile("SELECT volume, price FROM stocks", &catalog)?;
    let loads = plan_loads(&plan, &catalog)?;
    // stock_quote owns the primary key and joins in last
    assert_eq!(
        loads.metric_names(),
        vec!["stock_volume", "stock_price", "stock_quote"]
    );
    Ok(())
}

#[test]
fn test_key_equality_is_pushed_to_all_loaded_metrics() -> Result<()> {
    let catalog = common::stock_catalog();
    let plan = compile(
        "SELECT price, volume FROM stocks WHERE ticker = 'AAPL' AND price = 10",
        &catalog,
    )?;
    let loads = plan_loads(&plan, &catalog)?;
    let ticker = Predicate::eq("ticker", Scalar::Utf8("AAPL".into()));

    for load in &loads.loads {
        match load.metric.name.as_str() {
            // `price` maps to metric column `close`
            "stock_price" => assert_eq!(
                load.predicates,
                vec![ticker.clone(), Predicate::eq("close", Scalar::Int64(10))]
            ),
            _ => assert_eq!(load.predicates, vec![ticker.clone()]),
        }
    }
    Ok(())
}

#[test]
fn test_single_metric_query_has_no_join_partners() -> Result<()> {
    let catalog = common::stock_catalog();
    let plan = compile("SELECT ts FROM stocks WHERE price > 3", &catalog)?;
    let loads = plan_loads(&plan, &catalog)?;
    assert_eq!(loads.metric_names(), vec!["stock_price"]);
    assert!(loads.loads[0].predicates.is_empty());
    Ok(())
}
