use serde_json::Value;
use std::process::{Command, Output};

const VECTOR2_SEED: &str = "fffcf9f6f3f0edeae7e4e1dedbd8d5d2cfccc9c6c3c0bdbab7b4b1aeaba8a5a29f9c999693908d8a8784817e7b7875726f6c696663605d5a5754514e4b484542";

fn run(args: &[&str]) -> Output {
    let binary_path = assert_cmd::cargo::cargo_bin!("hd-keystore");
    Command::new(binary_path)
        .args(args)
        .env_remove("HD_KEYSTORE_LEVEL")
        .env_remove("HD_KEYSTORE_BUSY_POLICY")
        .env_remove("HD_KEYSTORE_DEBUG")
        .output()
        .expect("cli runs")
}

fn stdout_of(output: &Output) -> String {
    assert!(output.status.success(), "cli exited unsuccessfully: {:?}", output);
    String::from_utf8(output.stdout.clone()).expect("stdout is utf8")
}

#[test]
fn cli_derives_vector2_xpub() {
    let output = run(&["xpub", "--seed", VECTOR2_SEED, "--path", "m/84'/0'/0'/0/0"]);
    assert_eq!(
        stdout_of(&output).trim(),
        "xpub6GzdxUN9kG9JBLfiM8t7nYgFe2N4p2xd2fBYnE4povnHuu3NowyoZCYSBP4agz6UtRr1P2DtdzShGqftKAJHBLAuamT9D5u7T3cxYg5gSqt"
    );
}

#[test]
fn cli_emits_identifier_json() {
    let output = run(&["--json", "identifier", "--seed", VECTOR2_SEED, "--multisig"]);
    let json: Value = serde_json::from_str(&stdout_of(&output)).expect("stdout is valid json");

    assert_eq!(
        json["identifier"],
        "5a1db954aa259e1080889ffe439e9ccfe0136874617e2d583c86628e3db933b6"
    );
    assert_eq!(json["mode"], "multisig");
    assert_eq!(json["root"], "m/46'");
}

#[test]
fn cli_xpub_json_includes_public_key() {
    let output = run(&["xpub", "--json", "--seed", VECTOR2_SEED, "--path", "m/84'/0'/0'/0/0"]);
    let json: Value = serde_json::from_str(&stdout_of(&output)).expect("stdout is valid json");
    assert_eq!(
        json["public_key"],
        "02171456b4edec20748bfb8187d9fcef456c089ec46a032bcde6823ad772eb19a5"
    );
    assert_eq!(json["keypath"], "m/84'/0'/0'/0/0");
}

#[test]
fn cli_rejects_bad_seed() {
    let output = run(&["identifier", "--seed", "abcd"]);
    assert!(!output.status.success());

    let output = run(&["identifier", "--seed", "not-hex"]);
    assert!(!output.status.success());
}

#[test]
fn cli_check_path_reports_invalid_paths() {
    let ok = run(&["check-path", "--path", "m/48'/0'/0'/2'/0/1", "--script-type", "p2wsh"]);
    assert_eq!(stdout_of(&ok).trim(), "valid");

    let bad = run(&[
        "--json",
        "check-path",
        "--path",
        "m/44'/0'/0'/0/0",
        "--script-type",
        "p2wpkh",
        "--strict",
    ]);
    assert_eq!(bad.status.code(), Some(2));
    let json: Value = serde_json::from_slice(&bad.stdout).expect("stdout is valid json");
    assert_eq!(json["valid"], false);
    assert_eq!(json["error"]["code"], "invalid_path");
}
