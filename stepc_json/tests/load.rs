use anyhow::bail;
use std::path::Path;
use stepc_core::exec::{Effect, Process, Status, StepOutcome, World};
use stepc_core::program::Val;
use stepc_core::session::{LowerOptions, Session};

const MAXSTEP: usize = 1000;

#[test]
fn pingpong() -> anyhow::Result<()> {
    let unit = stepc_json::load(Path::new("./tests/pingpong.json"))?;
    assert_eq!(unit.name, "pingpong");
    assert_eq!(unit.methods.len(), 2);

    let mut session = Session::new(LowerOptions { dump_labels: true });
    let compiled = stepc_core::compile_unit(&unit, &mut session)?;
    assert!(session.diagnostics().is_empty());
    assert!(
        session
            .labels()
            .iter()
            .any(|(block, label)| block == "main.Enter" && label.starts_with("enter"))
    );

    let main = compiled.machine("main").expect("main");
    assert_eq!(main.valid_end_state.len(), 1);
    assert!(
        main.context_attributes
            .values()
            .flatten()
            .any(|attribute| attribute.name == "Label" && attribute.args == ["serve"])
    );
    let player = compiled.machine("player").expect("player");
    assert!(player.valid_end_state.is_empty());
    assert_eq!(player.runnable.len(), 1);

    // Runs the newest runnable process until none is left.
    let mut world = World::new(&compiled);
    assert_eq!(world.new_channel(), Val::Chan(Some(0)));
    assert_eq!(world.new_channel(), Val::Chan(Some(1)));
    let mut processes = vec![Process::new(&compiled, "main", Vec::new())?];
    let mut steps = 0;
    loop {
        processes.append(&mut world.spawned);
        let mut next = None;
        for (idx, process) in processes.iter().enumerate().rev() {
            if process.runnable(&compiled, &world)? {
                next = Some(idx);
                break;
            }
        }
        let Some(idx) = next else {
            break;
        };
        if processes[idx].step(&compiled, &mut world)? == StepOutcome::Choosing {
            bail!("unexpected choice");
        }
        steps += 1;
        if steps >= MAXSTEP {
            bail!("step limit reached");
        }
    }

    assert!(matches!(processes[0].status(), Status::Returned { .. }));
    assert_eq!(processes.len(), 2);
    assert_eq!(processes[1].status(), &Status::Running);
    assert!(world.effects.contains(&Effect::Trace("got 1".to_owned())));
    Ok(())
}

#[test]
fn missing_file() {
    let err = stepc_json::load(Path::new("./tests/missing.json")).expect_err("missing file");
    assert!(err.to_string().contains("missing.json"));
}

#[test]
fn malformed_unit() {
    // `body` is required.
    let err = stepc_json::parse_str(r#"{ "methods": [{ "name": "main" }] }"#).expect_err("malformed");
    assert!(format!("{err:#}").contains("body"));
}

#[test]
fn unknown_statement_kind() {
    let result = stepc_json::parse_str(
        r#"{ "methods": [{ "name": "main", "body": [{ "kind": "fork" }] }] }"#,
    );
    assert!(result.is_err());
}
