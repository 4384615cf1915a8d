#![cfg(feature = "storage-rocksdb")]

mod common;

use assert_cmd::cargo_bin;
use serde_json::Value;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

fn run(db_path: &std::path::Path, args: &[&str]) -> Value {
    let output = Command::new(cargo_bin!("autopay-engine"))
        .args(args)
        .arg("--db-path")
        .arg(db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");
    let scenario = dir.path().join("scenario.json");
    common::write_scenario(&scenario, 3).unwrap();

    // 1. Seed users, wallets and orders on the start date.
    let seed = run(&db_path, &["seed", scenario.to_str().unwrap()]);
    assert_eq!(seed["orders_placed"].as_array().unwrap().len(), 2);

    // 2. A top-up in a later process lands on the persisted wallet.
    let mut csv = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv, "user, amount").unwrap();
    writeln!(csv, "poor, 50").unwrap();
    let balances = run(&db_path, &["top-up", csv.path().to_str().unwrap()]);
    assert_eq!(balances[0]["user_id"], "poor");
    assert_eq!(balances[0]["available"].as_str().unwrap().parse::<f64>().unwrap(), 250.0);

    // 3. The next day's batch finds both orders and charges them.
    let summary = run(&db_path, &["run", "--date", "2026-07-02"]);
    assert_eq!(summary["success"], 2);

    // 4. Running it again the same day charges nothing.
    let repeat = run(&db_path, &["run", "--date", "2026-07-02"]);
    assert_eq!(repeat["success"], 0);
    assert_eq!(repeat["skipped"], 2);

    // 5. Read models see the persisted autopay history.
    let insights = run(&db_path, &["insights", "rich", "--date", "2026-07-02"]);
    assert_eq!(insights["history"]["total"], 1);
    assert_eq!(insights["orders"][0]["paid_installments"], 2);
}
