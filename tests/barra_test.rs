use std::collections::HashMap;
use std::fs::{create_dir_all, remove_dir_all};
use std::path::PathBuf;
use std::sync::Arc;

use cabomba::exchange::barra_v1::{Balance, BarraError, BarraV1, CASH};
use cabomba::input::selene::{DataError, Selene, SeleneBuilder};

fn data_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cabomba_{}_{}", name, std::process::id()));
    create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_that_exchange_runs_against_csv_data() {
    let dir = data_dir("run");
    std::fs::write(
        dir.join("BTC.csv"),
        "date,open,close,volume\n100,9.0,10.0,5\n200,11.0,12.0,5\n300,11.5,11.0,5\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("ETH.csv"),
        "date,close\n100,2.0\n200,4.0\n300,5.0\n",
    )
    .unwrap();

    let exchange = BarraV1::from_dir(&dir, Balance::with_cash(1_000.0), 0.0, 1.0).unwrap();
    assert_eq!(exchange.now(), 100);
    assert_eq!(exchange.fee(), 0.0);
    assert_eq!(exchange.min_order_size(), 1.0);
    assert_eq!(
        exchange.balance().keys(),
        vec!["BTC".to_string(), "ETH".to_string(), "cash".to_string()]
    );

    let bought = exchange.buy("BTC", 10.0).unwrap();
    assert_eq!(bought.cash(), 900.0);

    let stepped = bought.next_step().unwrap();
    assert_eq!(stepped.now(), 200);
    assert_eq!(stepped.capital(), 900.0 + 10.0 * 12.0);

    let sold = stepped.sell("BTC", 10.0).unwrap();
    assert_eq!(sold.cash(), 1_020.0);

    let last = sold.next_step().unwrap();
    assert!(matches!(last.next_step(), Err(BarraError::EndOfData)));

    remove_dir_all(&dir).ok();
}

#[test]
fn test_that_misaligned_files_fail_to_load() {
    let dir = data_dir("misaligned");
    std::fs::write(dir.join("BTC.csv"), "date,close\n100,10.0\n200,12.0\n300,11.0\n").unwrap();
    std::fs::write(dir.join("ETH.csv"), "date,close\n100,2.0\n200,4.0\n").unwrap();

    assert!(matches!(
        Selene::from_dir(&dir),
        Err(DataError::Alignment { .. })
    ));

    //The convenience constructor surfaces the same failure
    let res = BarraV1::from_dir(&dir, Balance::with_cash(1_000.0), 0.0, 1.0);
    assert!(matches!(
        res.unwrap_err().downcast_ref::<DataError>(),
        Some(DataError::Alignment { .. })
    ));

    remove_dir_all(&dir).ok();
}

#[test]
fn test_that_missing_close_column_fails_to_load() {
    let dir = data_dir("noclose");
    std::fs::write(dir.join("BTC.csv"), "date,open\n100,10.0\n").unwrap();

    assert!(matches!(
        Selene::from_dir(&dir),
        Err(DataError::MissingClose { .. })
    ));

    remove_dir_all(&dir).ok();
}

#[test]
fn test_that_files_without_date_column_align_by_row() {
    let dir = data_dir("nodates");
    std::fs::write(dir.join("BTC.csv"), "close\n10.0\n12.0\n").unwrap();
    std::fs::write(dir.join("ETH.csv"), "close\n2.0\n4.0\n").unwrap();

    let exchange = BarraV1::from_dir(&dir, Balance::with_cash(100.0), 0.0, 0.0).unwrap();
    assert_eq!(exchange.now(), 0);
    assert_eq!(exchange.next_step().unwrap().now(), 1);

    remove_dir_all(&dir).ok();
}

#[test]
fn test_that_steps_match_row_count() {
    let mut builder = SeleneBuilder::new();
    for date in 0..5 {
        builder.add_close(10.0, date, "BTC");
    }
    let exchange = BarraV1::new(
        Arc::new(builder.build().unwrap()),
        Balance::with_cash(100.0),
        0.0,
        0.0,
    )
    .unwrap();

    //Five rows: exactly four steps succeed
    let mut state = exchange;
    let mut steps = 0;
    while state.has_next() {
        state = state.next_step().unwrap();
        steps += 1;
    }
    assert_eq!(steps, 4);
    assert!(matches!(state.next_step(), Err(BarraError::EndOfData)));
}

#[test]
fn test_that_portfolio_stays_normalised_over_a_run() {
    let mut builder = SeleneBuilder::new();
    builder.add_close(10.0, 100, "BTC");
    builder.add_close(2.0, 100, "ETH");
    builder.add_close(14.0, 200, "BTC");
    builder.add_close(1.0, 200, "ETH");
    builder.add_close(9.0, 300, "BTC");
    builder.add_close(3.0, 300, "ETH");

    let mut state = BarraV1::new(
        Arc::new(builder.build().unwrap()),
        Balance::with_cash(1_000.0),
        0.002,
        1.0,
    )
    .unwrap();
    state = state.buy("BTC", 40.0).unwrap();
    state = state.buy("ETH", 100.0).unwrap();

    loop {
        let portfolio = state.portfolio().unwrap();
        let total: f64 = portfolio.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        match state.next_step() {
            Ok(next) => state = next,
            Err(_) => break,
        }
    }
}

#[test]
fn test_that_history_can_branch_from_any_state() {
    let mut builder = SeleneBuilder::new();
    builder.add_close(10.0, 100, "BTC");
    builder.add_close(20.0, 200, "BTC");

    let start = BarraV1::new(
        Arc::new(builder.build().unwrap()),
        Balance::with_cash(1_000.0),
        0.0,
        0.0,
    )
    .unwrap();

    //Two different futures from the same snapshot
    let all_in = start.buy("BTC", 100.0).unwrap();
    let half_in = start.buy("BTC", 50.0).unwrap();

    assert_eq!(all_in.cash(), 0.0);
    assert_eq!(half_in.cash(), 500.0);
    assert_eq!(start.cash(), 1_000.0);

    let all_in_later = all_in.next_step().unwrap();
    assert_eq!(all_in_later.capital(), 2_000.0);
    assert_eq!(half_in.next_step().unwrap().capital(), 1_500.0);
}

#[test]
fn test_that_rebalance_runs_against_csv_data() {
    let dir = data_dir("rebalance");
    std::fs::write(dir.join("BTC.csv"), "date,close\n100,8.0\n200,16.0\n").unwrap();
    std::fs::write(dir.join("ETH.csv"), "date,close\n100,2.0\n200,1.0\n").unwrap();

    let exchange = BarraV1::from_dir(&dir, Balance::with_cash(1_000.0), 0.0, 0.0).unwrap();

    let mut target = HashMap::new();
    target.insert(CASH.to_string(), 0.25);
    target.insert("BTC".to_string(), 0.5);
    target.insert("ETH".to_string(), 0.25);

    let rebalanced = exchange.rebalance(&target).unwrap();
    let portfolio = rebalanced.portfolio().unwrap();
    assert!((portfolio.get("BTC").unwrap() - 0.5).abs() < 1e-9);
    assert!((portfolio.get(CASH).unwrap() - 0.25).abs() < 1e-9);

    remove_dir_all(&dir).ok();
}
