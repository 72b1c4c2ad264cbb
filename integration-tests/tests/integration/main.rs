// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests
//!
//! Units are JSON scenario files played by the `fake-worker` helper binary. Tests either drive
//! the runner library directly through `ProcessExecutor`, or run the `partest-dup` binary (a
//! duplicate of partest's main.rs) to check end-to-end behavior and exit codes.

use indoc::indoc;
use integration_tests::scenario::{AttemptScript, Ending, Scenario, ScriptSuite, ScriptTest};
use partest_metadata::PartestExitCode;
use pretty_assertions::assert_eq;

mod fixtures;

use fixtures::*;

fn passing_suite(title: &str) -> Scenario {
    Scenario::always(
        AttemptScript::new().suite(ScriptSuite::new(title).test(ScriptTest::pass("works"))),
    )
}

#[test]
fn serial_units_run_one_after_another() {
    let units = TempUnits::new();
    let files = [
        units.add("a.json", &passing_suite("a")),
        units.add("b.json", &passing_suite("b")),
    ];

    let outcome = run_units(&files, 1, 0);

    assert_eq!(
        outcome.log,
        vec![
            "start 2",
            "root",
            "suite []",
            "suite [a]",
            "test [a works]",
            "pass [a works]",
            "suite end [a]",
            "suite end []",
            "suite []",
            "suite [b]",
            "test [b works]",
            "pass [b works]",
            "suite end [b]",
            "suite end []",
            "root end",
            "end 2",
        ]
    );
    assert_eq!(outcome.max_running, 1);
    assert_eq!(outcome.exit_code, 0);
}

#[test]
fn bounded_parallelism() {
    let units = TempUnits::new();
    let files: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|name| {
            let scenario = Scenario::always(
                AttemptScript::new()
                    .sleep_ms(100)
                    .suite(ScriptSuite::new(name).test(ScriptTest::pass("works"))),
            );
            units.add(&format!("{name}.json"), &scenario)
        })
        .collect();

    let outcome = run_units(&files, 2, 0);

    assert!(
        outcome.max_running <= 2,
        "at most 2 units run at once, saw {}",
        outcome.max_running
    );
    assert_eq!(outcome.unit_files.len(), 3, "every unit is merged into the root suite");
    let stats = outcome.stats.expect("run completed");
    assert_eq!(stats.passes, 3);
    assert_eq!(outcome.exit_code, 0);
}

#[test]
fn units_merge_in_completion_order() {
    let units = TempUnits::new();
    let slow = units.add(
        "a.json",
        &Scenario::always(
            AttemptScript::new()
                .sleep_ms(300)
                .suite(ScriptSuite::new("a").test(ScriptTest::pass("works"))),
        ),
    );
    let fast = units.add("b.json", &passing_suite("b"));

    // `a` is submitted first, but `b` finishes first.
    let outcome = run_units(&[slow.clone(), fast.clone()], 2, 0);

    assert_eq!(outcome.max_running, 2);
    assert_eq!(
        outcome.unit_files,
        vec![fast.to_string(), slow.to_string()],
        "unit suites are appended in completion order"
    );
    assert_eq!(
        outcome.log,
        vec![
            "start 2",
            "root",
            "suite []",
            "suite [b]",
            "test [b works]",
            "pass [b works]",
            "suite end [b]",
            "suite end []",
            "suite []",
            "suite [a]",
            "test [a works]",
            "pass [a works]",
            "suite end [a]",
            "suite end []",
            "root end",
            "end 2",
        ]
    );
    assert_eq!(outcome.exit_code, 0);
}

#[test]
fn flaky_unit_counts_last_attempt_only() {
    let units = TempUnits::new();
    let failing = AttemptScript::new().suite(
        ScriptSuite::new("flaky")
            .test(ScriptTest::pass("steady"))
            .test(ScriptTest::fail("wobbly")),
    );
    let passing = AttemptScript::new().suite(
        ScriptSuite::new("flaky")
            .test(ScriptTest::pass("steady"))
            .test(ScriptTest::pass("wobbly")),
    );
    let file = units.add(
        "flaky.json",
        &Scenario::attempts([failing.clone(), failing, passing]),
    );

    let outcome = run_units(&[file], 1, 2);

    let retries: Vec<_> = outcome
        .log
        .iter()
        .filter(|line| line.starts_with("retry"))
        .collect();
    assert_eq!(retries, vec!["retry unit flaky.json #1", "retry unit flaky.json #2"]);
    let stats = outcome.stats.expect("run completed");
    assert_eq!(stats.tests, 2);
    assert_eq!(stats.passes, 2);
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.units_retried, 2);
    assert_eq!(outcome.exit_code, 0);
}

#[test]
fn exhausted_retries_report_final_failures() {
    let units = TempUnits::new();
    let file = units.add(
        "broken.json",
        &Scenario::always(
            AttemptScript::new().suite(
                ScriptSuite::new("broken")
                    .test(ScriptTest::fail("one"))
                    .test(ScriptTest::fail("two")),
            ),
        ),
    );

    let outcome = run_units(&[file], 1, 1);

    let retry_count = outcome
        .log
        .iter()
        .filter(|line| line.starts_with("retry unit"))
        .count();
    assert_eq!(retry_count, 1);
    let stats = outcome.stats.expect("run completed");
    assert_eq!(stats.failures, 2);
    assert_eq!(stats.units_failed, 1);
    assert_eq!(outcome.exit_code, 2);
}

#[test]
fn crashed_unit_halts_run() {
    let units = TempUnits::new();
    let file = units.add(
        "crash.json",
        &Scenario::always(
            AttemptScript::new()
                .test(ScriptTest::pass("before the crash"))
                .ending(Ending::Crash { exit_code: 1 }),
        ),
    );

    // Crashes are never retried.
    let outcome = run_units(&[file], 1, 3);

    assert_eq!(outcome.exit_code, 1);
    assert!(outcome.stats.is_none(), "no stats are reported for a halted run");
    assert!(
        !outcome.log.iter().any(|line| line.starts_with("retry")),
        "crashes are not retried: {:?}",
        outcome.log
    );
}

#[test]
fn malformed_output_is_fatal() {
    let units = TempUnits::new();
    let file = units.add(
        "garbled.json",
        &Scenario::always(
            AttemptScript::new()
                .test(ScriptTest::pass("fine"))
                .ending(Ending::Malformed),
        ),
    );

    let outcome = run_units(&[file], 1, 0);

    assert_eq!(outcome.exit_code, PartestExitCode::UNIT_PROTOCOL_ERROR);
    assert!(outcome.stats.is_none());
}

#[test]
fn in_worker_retries_are_recorded() {
    let units = TempUnits::new();
    let file = units.add(
        "retried.json",
        &Scenario::always(
            AttemptScript::new().suite(
                ScriptSuite::new("net").test(ScriptTest::pass("fetches").with_retries(2)),
            ),
        ),
    );

    let outcome = run_units(&[file], 1, 0);

    let retries: Vec<_> = outcome
        .log
        .iter()
        .filter(|line| line.starts_with("retry"))
        .collect();
    assert_eq!(
        retries,
        vec!["retry test [net fetches]", "retry test [net fetches]"]
    );
    assert_eq!(outcome.exit_code, 0);
}

// ---
// CLI tests
// ---

#[test]
fn cli_exit_code_is_failure_count() {
    let units = TempUnits::new();
    let file = units.add(
        "math.json",
        &Scenario::always(
            AttemptScript::new().suite(
                ScriptSuite::new("math")
                    .test(ScriptTest::pass("adds"))
                    .test(ScriptTest::fail("divides"))
                    .test(ScriptTest::pending("later"))
                    .suite(ScriptSuite::new("hooks").failing_hook("setup failed")),
            ),
        ),
    );

    let output = partest_cli()
        .current_dir(units.path())
        .args(["--reporter", "json", file.as_str()])
        .unchecked(true)
        .output();

    assert_eq!(output.exit_status.code(), Some(2), "{output}");
    let report = output.decode_json_report().expect("valid JSON report");
    assert_eq!(report["stats"]["passes"], 1, "{output}");
    assert_eq!(report["stats"]["failures"], 2);
    assert_eq!(report["stats"]["pending"], 1);
    assert_eq!(report["stats"]["tests"], 3);
    assert_eq!(report["failures"][1]["fullTitle"], "math hooks \"before all\"");
}

#[test]
fn cli_spec_reporter() {
    let units = TempUnits::new();
    let file = units.add("ok.json", &passing_suite("greeting"));

    let output = partest_cli()
        .current_dir(units.path())
        .args(["run", file.as_str()])
        .output();

    let stdout = output.stdout_as_str();
    assert!(stdout.contains("  greeting\n"), "{output}");
    assert!(stdout.contains("✔ works"), "{output}");
    assert!(stdout.contains("1 passing"), "{output}");
}

#[test]
fn cli_no_files() {
    let units = TempUnits::new();
    let output = partest_cli()
        .current_dir(units.path())
        .unchecked(true)
        .output();

    assert_eq!(
        output.exit_status.code(),
        Some(PartestExitCode::NO_UNITS),
        "{output}"
    );
}

#[test]
fn cli_crash_propagates_exit_code() {
    let units = TempUnits::new();
    let file = units.add(
        "crash.json",
        &Scenario::always(AttemptScript::new().ending(Ending::Crash { exit_code: 7 })),
    );

    let output = partest_cli()
        .current_dir(units.path())
        .args(["--retries", "2", file.as_str()])
        .unchecked(true)
        .output();

    assert_eq!(output.exit_status.code(), Some(7), "{output}");
    assert!(
        !output.stdout_as_str().contains("passing"),
        "no summary is printed for a halted run: {output}"
    );
    assert!(output.stderr_as_str().contains("crashed"), "{output}");
}

#[test]
fn cli_unstartable_worker() {
    let units = TempUnits::new();
    let file = units.add("ok.json", &passing_suite("never runs"));

    let output = partest_cli()
        .current_dir(units.path())
        .args(["--worker", "/nonexistent/partest-worker", file.as_str()])
        .unchecked(true)
        .output();

    assert_eq!(
        output.exit_status.code(),
        Some(PartestExitCode::UNIT_START_FAILED),
        "{output}"
    );
}

#[test]
fn cli_profile_from_config() {
    let units = TempUnits::new();
    units.write_config(indoc! {r#"
        [profile.ci]
        retries = 1
        reporter = "json"
    "#});
    let file = units.add(
        "flaky.json",
        &Scenario::attempts([
            AttemptScript::new().test(ScriptTest::fail("wobbly")),
            AttemptScript::new().test(ScriptTest::pass("wobbly")),
        ]),
    );

    let output = partest_cli()
        .current_dir(units.path())
        .env("PARTEST_PROFILE", "ci")
        .arg(file.as_str())
        .output();

    let report = output.decode_json_report().expect("valid JSON report");
    assert_eq!(report["stats"]["passes"], 1, "{output}");
    assert_eq!(report["stats"]["failures"], 0);
}

#[test]
fn cli_unknown_profile() {
    let units = TempUnits::new();
    let file = units.add("ok.json", &passing_suite("a"));

    let output = partest_cli()
        .current_dir(units.path())
        .args(["--profile", "nope", file.as_str()])
        .unchecked(true)
        .output();

    assert_eq!(
        output.exit_status.code(),
        Some(PartestExitCode::SETUP_ERROR),
        "{output}"
    );
    assert!(output.stderr_as_str().contains("profile `nope` not found"), "{output}");
}

#[test]
fn cli_grep_reaches_workers() {
    let units = TempUnits::new();
    let file = units.add(
        "math.json",
        &Scenario::always(
            AttemptScript::new().suite(
                ScriptSuite::new("math")
                    .test(ScriptTest::pass("adds"))
                    .test(ScriptTest::fail("divides")),
            ),
        ),
    );

    let output = partest_cli()
        .current_dir(units.path())
        .args(["-g", "adds", "-R", "json", file.as_str()])
        .output();

    let report = output.decode_json_report().expect("valid JSON report");
    assert_eq!(report["stats"]["tests"], 1, "{output}");
    assert_eq!(report["passes"][0]["fullTitle"], "math adds");
}
