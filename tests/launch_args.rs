use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::Parser;
use tempfile::tempdir;
use towerflow::approval_decisions;
use towerflow::cli::CliArgs;
use towerflow::config::load_and_validate;
use towerflow::config::model::WorkflowDefinition;
use towerflow::engine::StandingDecision;

type TestResult = Result<(), Box<dyn Error>>;

fn demo(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("demos")
        .join(name)
}

fn args(flags: &[&str]) -> Result<CliArgs, clap::Error> {
    CliArgs::try_parse_from(std::iter::once("towerflow").chain(flags.iter().copied()))
}

/// A gate with no timeout anywhere, followed by `ship`.
fn untimed_gate(config: &str) -> Result<WorkflowDefinition, Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("Towerflow.toml");
    fs::write(
        &path,
        format!(
            r#"
{config}

[workflow]
name = "wf"

[template.hold]
kind = "approval"

[node.hold]
template = "hold"
success = ["ship"]

[node.ship]
"#
        ),
    )?;
    Ok(load_and_validate(&path)?)
}

#[test]
fn approve_and_deny_flags_repeat() -> TestResult {
    let parsed = args(&["--approve", "a", "--approve", "b", "--deny", "c"])?;
    assert_eq!(parsed.approve, vec!["a", "b"]);
    assert_eq!(parsed.deny, vec!["c"]);
    Ok(())
}

#[test]
fn untimed_gate_must_be_decided_before_launch() -> TestResult {
    let definition = untimed_gate("")?;

    let err = approval_decisions(&definition, &args(&[])?).unwrap_err();
    assert!(err.to_string().contains("--approve hold"), "{err}");

    let decisions = approval_decisions(&definition, &args(&["--approve", "hold"])?)?;
    assert_eq!(
        decisions,
        vec![("hold".to_string(), StandingDecision::Approve)]
    );

    let decisions = approval_decisions(&definition, &args(&["--deny", "hold"])?)?;
    assert_eq!(decisions, vec![("hold".to_string(), StandingDecision::Deny)]);
    Ok(())
}

#[test]
fn engine_default_timeout_makes_a_gate_answerable() -> TestResult {
    let definition = untimed_gate("[config]\napproval_default_timeout = \"5m\"")?;
    assert!(approval_decisions(&definition, &args(&[])?)?.is_empty());
    Ok(())
}

#[test]
fn decisions_must_name_one_approval_node_once() -> TestResult {
    let definition = load_and_validate(demo("approval.toml"))?;
    assert!(approval_decisions(&definition, &args(&[])?)?.is_empty());

    let err = approval_decisions(&definition, &args(&["--approve", "lint"])?).unwrap_err();
    assert!(err.to_string().contains("not an approval node"), "{err}");

    let err = approval_decisions(
        &definition,
        &args(&["--approve", "sign_off", "--deny", "sign_off"])?,
    )
    .unwrap_err();
    assert!(err.to_string().contains("both approved and denied"), "{err}");

    let decisions = approval_decisions(
        &definition,
        &args(&["--approve", "sign_off", "--approve", "sign_off"])?,
    )?;
    assert_eq!(decisions.len(), 1);
    Ok(())
}
