use std::fs;

use rotala_sim::portfolio::{TransactionLog, ValueType};
use rotala_sim::simcontext::{SimConfig, SimContextBuilder};

const RANDOM_WALK: &str = r#"{
    "starting_cash": 100000.0,
    "start": 0,
    "end": 7200,
    "step_secs": 600,
    "commission": [{"PerShare": 0.01}],
    "instruments": [{
        "instrument": {"symbol": "ABC", "security_type": "Stock", "exchange": "SMART", "currency": "USD"},
        "feed": {"kind": "RandomWalk", "start_price": 100.0, "volatility": 0.001, "interval_secs": 60, "seed": 42}
    }, {
        "instrument": {"symbol": "BCD", "security_type": "Stock", "exchange": "SMART", "currency": "USD"},
        "feed": {"kind": "RandomWalk", "start_price": 50.0, "volatility": 0.002, "interval_secs": 30, "seed": 43}
    }],
    "schedule": [
        {"at": 600, "symbol": "ABC", "order": {"quantity": 100.0, "order_type": "Market"}},
        {"at": 900, "symbol": "BCD", "order": {"quantity": -200.0, "order_type": "Market"}},
        {"at": 3600, "symbol": "ABC", "order": {"quantity": -100.0, "order_type": "Market"}}
    ]
}"#;

#[test]
fn test_that_config_driven_run_balances() {
    let config = SimConfig::from_json(RANDOM_WALK).unwrap();
    let mut ctx = SimContextBuilder::from_config(&config)
        .unwrap()
        .build()
        .unwrap();
    ctx.run().unwrap();

    assert_eq!(*ctx.now(), 7200);
    assert_eq!(ctx.rejected_orders(), 0);

    let closed = ctx.closed_positions();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].symbol, "ABC");
    assert!((closed[0].commissions - 2.0).abs() < 1e-9);

    let bcd = ctx.instrument("BCD").unwrap().clone();
    let account = ctx.account();
    let short = account.position(&bcd).unwrap();
    assert_eq!(short.quantity(), -200.0);

    //Net liquidation is cash plus every open position at its mark
    let cash = account.get_value(ValueType::CashBalance);
    let marked = short.market_value();
    let net = account.get_value(ValueType::NetLiquidation);
    assert!((net - (cash + marked)).abs() < 1e-6);
}

#[test]
fn test_that_same_seed_replays_identically() {
    let run = || {
        let config = SimConfig::from_json(RANDOM_WALK).unwrap();
        let mut ctx = SimContextBuilder::from_config(&config)
            .unwrap()
            .build()
            .unwrap();
        ctx.run().unwrap();
        ctx.closed_positions()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_that_csv_feed_runs_and_writes_closed_positions() {
    let dir = std::env::temp_dir().join(format!("rotala-sim-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let ticks = dir.join("ticks.csv");
    fs::write(
        &ticks,
        "time,bid,ask,bid_size,ask_size,last,last_size,volume\n\
         100,9.9,10.1,100,100,10.0,10,10\n\
         200,10.9,11.1,100,100,11.0,10,20\n\
         300,11.9,12.1,100,100,12.0,10,30\n",
    )
    .unwrap();

    let config = format!(
        r#"{{
            "starting_cash": 1000.0,
            "start": 0,
            "instruments": [{{
                "instrument": {{"symbol": "ABC", "security_type": "Stock", "exchange": "SMART", "currency": "USD"}},
                "feed": {{"kind": "Csv", "path": {:?}}}
            }}],
            "schedule": [
                {{"at": 100, "symbol": "ABC", "order": {{"quantity": 10.0, "order_type": "Market"}}}},
                {{"at": 300, "symbol": "ABC", "order": {{"quantity": -10.0, "order_type": "Limit", "limit_price": 11.5}}}}
            ]
        }}"#,
        ticks.display().to_string()
    );
    let config = SimConfig::from_json(&config).unwrap();
    let mut ctx = SimContextBuilder::from_config(&config)
        .unwrap()
        .build()
        .unwrap();
    ctx.run().unwrap();

    let closed = ctx.closed_positions();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].entry_price, 10.0);
    //Sell limit fills at the bid when it is through the limit
    assert_eq!(closed[0].exit_price, 11.9);
    assert!((ctx.snapshot().cash - 1019.0).abs() < 1e-9);

    let mut log = TransactionLog::from_writer(Vec::new());
    log.append_all(&closed).unwrap();
    assert_eq!(log.written(), 1);
    let out = String::from_utf8(log.into_inner().unwrap()).unwrap();
    let mut lines = out.lines();
    assert!(lines.next().unwrap().starts_with("symbol,side"));
    assert!(lines.next().unwrap().starts_with("ABC,Long"));

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_that_missing_csv_fails_before_running() {
    let config = SimConfig::from_json(
        r#"{
            "starting_cash": 1000.0,
            "start": 0,
            "instruments": [{
                "instrument": {"symbol": "ABC", "security_type": "Stock", "exchange": "SMART", "currency": "USD"},
                "feed": {"kind": "Csv", "path": "/no/such/ticks.csv"}
            }]
        }"#,
    )
    .unwrap();
    assert!(SimContextBuilder::from_config(&config).is_err());
}

#[test]
fn test_that_historical_feed_needs_an_end() {
    let config = SimConfig::from_json(
        r#"{
            "starting_cash": 1000.0,
            "start": 0,
            "instruments": [{
                "instrument": {"symbol": "BTCUSDT", "security_type": "Stock", "exchange": "BINANCE", "currency": "USDT"},
                "feed": {"kind": "Binance", "unit": "Minute"}
            }]
        }"#,
    )
    .unwrap();
    assert!(SimContextBuilder::from_config(&config).is_err());
}
