use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

/// A config-requiring action invoked with no `-c` must fail fast with exit
/// code 1 and a log line explaining why, instead of attempting any I/O.
#[test]
fn produce_without_config_exits_with_failure() -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("walt")?;
    cmd.arg("produce");
    cmd.assert().failure().code(1);
    Ok(())
}

#[test]
fn consume_without_config_exits_with_failure() -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("walt")?;
    cmd.arg("consume");
    cmd.assert().failure().code(1);
    Ok(())
}

/// The two sample-generating actions need no config file and must succeed,
/// printing a TOML document to stdout.
#[test]
fn generate_config_sample_does_not_require_config() -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("walt")?;
    cmd.arg("generate-config-sample");
    cmd.assert().success().stdout(predicate::str::contains("concurrent"));
    Ok(())
}

#[test]
fn generate_config_sample_from_env_applies_overrides() -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("walt")?;
    cmd.env("WALT_CONCURRENT", "11");
    cmd.arg("generate-config-sample-from-env");
    cmd.assert().success().stdout(predicate::str::contains("concurrent = 11"));
    Ok(())
}
