mod common;

use std::fs;
use std::process::{Command, Output};

use common::{INTEGER_SCHEMA, TestWorkspace};

fn rewrite_xml(args: &[&str], cwd: &std::path::Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rewrite-xml"))
        .args(args)
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .env_remove("REWRITE_XML_INPUT_DIR")
        .env_remove("REWRITE_XML_OUTPUT_DIR")
        .env_remove("REWRITE_XML_THREADS")
        .env_remove("REWRITE_XML_PRETTY_PRINT")
        .env_remove("REWRITE_XML_ENCODING")
        .output()
        .expect("Failed to execute command")
}

fn write_toml_config(ws: &TestWorkspace, extra: &str) -> String {
    let content = format!(
        r#"input_directory = "{}"
output_directory = "{}"
{}

[[rules]]
path = "/a/b"
expected_value = "1"
new_value = "2"
"#,
        ws.input.display().to_string().replace('\\', "/"),
        ws.output.display().to_string().replace('\\', "/"),
        extra
    );
    let path = ws.add_file("rewrite-xml.toml", &content);
    path.display().to_string()
}

#[test]
fn test_cli_help_output() {
    let ws = TestWorkspace::new();
    let output = rewrite_xml(&["--help"], ws.root());

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("--config"));
    assert!(stdout.contains("--input"));
    assert!(stdout.contains("--output"));
    assert!(stdout.contains("--threads"));
    assert!(stdout.contains("--pretty-print"));
    assert!(stdout.contains("--quiet"));
}

#[test]
fn test_cli_version_output() {
    let ws = TestWorkspace::new();
    let output = rewrite_xml(&["--version"], ws.root());

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains(concat!("rewrite-xml ", env!("CARGO_PKG_VERSION"))));
}

#[test]
fn test_cli_conflicting_options() {
    let ws = TestWorkspace::new();
    let output = rewrite_xml(&["--verbose", "--quiet"], ws.root());

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("cannot be used with"));
}

#[test]
fn test_cli_clean_run_exits_zero() {
    let ws = TestWorkspace::new();
    ws.add_input("a.xml", "<a><b>1</b></a>");
    let config = write_toml_config(&ws, "");

    let output = rewrite_xml(&["--config", &config], ws.root());

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Rewrite Summary:"));
    assert!(stdout.contains("Written: 1"));
    assert!(ws.read_output("a.xml").contains("<b>2</b>"));
}

#[test]
fn test_cli_finds_config_in_working_directory() {
    let ws = TestWorkspace::new();
    ws.add_input("a.xml", "<a><b>1</b></a>");
    write_toml_config(&ws, "");

    let output = rewrite_xml(&["--quiet"], ws.root());

    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8(output.stdout).unwrap().is_empty());
    assert!(ws.output_file("a.xml").exists());
}

#[test]
fn test_cli_file_failure_exits_one() {
    let ws = TestWorkspace::new();
    ws.add_input("a.xml", "<a><b>1</b></a>");
    ws.add_file("schema.xsd", INTEGER_SCHEMA);
    let schema = ws.root().join("schema.xsd");
    let config = write_toml_config(
        &ws,
        &format!(
            "[schema_validation]\nenabled = true\nschema_path = \"{}\"\n",
            schema.display().to_string().replace('\\', "/")
        ),
    );
    // Make the rewrite produce a schema-invalid value
    let content = fs::read_to_string(&config)
        .unwrap()
        .replace("new_value = \"2\"", "new_value = \"two\"");
    fs::write(&config, content).unwrap();

    let output = rewrite_xml(&["--config", &config], ws.root());

    assert_eq!(output.status.code(), Some(1));
    assert!(!ws.output_file("a.xml").exists());
    assert!(ws.read_log("a.xml").contains("XML validation failed"));
}

#[test]
fn test_cli_invalid_config_exits_two() {
    let ws = TestWorkspace::new();
    let config = ws.add_file(
        "broken.toml",
        "input_directory = \"in\"\noutput_directory = \"out\"\nrules = []\n",
    );

    let output = rewrite_xml(&["--config", config.to_str().unwrap()], ws.root());

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("Configuration error"));
}

#[test]
fn test_cli_missing_config_exits_two() {
    let ws = TestWorkspace::new();
    let output = rewrite_xml(&["--config", "missing.toml"], ws.root());

    assert_eq!(output.status.code(), Some(2));
    assert!(
        String::from_utf8(output.stderr)
            .unwrap()
            .contains("does not exist")
    );
}

#[test]
fn test_cli_overrides_output_directory() {
    let ws = TestWorkspace::new();
    ws.add_input("a.xml", "<a><b>1</b></a>");
    let config = write_toml_config(&ws, "");
    let elsewhere = ws.root().join("elsewhere");

    let output = rewrite_xml(
        &[
            "--config",
            &config,
            "--output",
            elsewhere.to_str().unwrap(),
            "--pretty-print",
        ],
        ws.root(),
    );

    assert_eq!(output.status.code(), Some(0));
    assert!(!ws.output_file("a.xml").exists());
    let rewritten = fs::read_to_string(elsewhere.join("a.xml")).unwrap();
    assert!(rewritten.contains("\n  <b>2</b>\n"));
}
