use std::io::Write;

use assert_cmd::Command;
use predicates as pred;
use predicates::prelude::*;
use tempfile::NamedTempFile;

#[test]
fn end_to_end_outputs_expected_balances() {
    // user 1: 100.00 in, 30.00 out, 20.00 sent to user 2 => 50.00
    // user 2: 20.00 received, oversized withdrawal rejected => 20.00
    // user 3: never opened, every command for it is rejected
    let mut file = NamedTempFile::new().expect("create temp file");
    writeln!(
        file,
        "type, user, to_user, amount, comment\n\
    open, 1, , ,\n\
    open, 2, , ,\n\
    deposit, 1, , 100.00, salary\n\
    withdraw, 1, , 30.00,\n\
    transfer, 1, 2, 20.00, rent\n\
    withdraw, 2, , 60.00,\n\
    deposit, 3, , 5.00,\n\
    transfer, 2, 2, 1.00,\n\
    refund, 1, , 1.00,\n\
    deposit, 1, , 0.001,"
    )
    .unwrap();

    let exe = env!("CARGO_BIN_EXE_balance_ledger");
    let mut cmd = Command::new(exe);
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stdout(pred::str::contains("user,balance"))
        .stdout(pred::str::contains("1,50.00"))
        .stdout(pred::str::contains("2,20.00"))
        .stdout(pred::str::contains("3,").not());
}

#[test]
fn missing_argument_fails() {
    let exe = env!("CARGO_BIN_EXE_balance_ledger");
    Command::new(exe)
        .assert()
        .failure()
        .stderr(pred::str::contains("usage"));
}
