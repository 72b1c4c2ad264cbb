// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A worker program for integration tests.
//!
//! The unit file passed as the last argument is a [`Scenario`] in JSON form. The worker plays
//! the script for the current attempt, as reported by partest through the environment.

use camino::Utf8PathBuf;
use color_eyre::{Result, eyre::eyre};
use integration_tests::scenario::Scenario;
use partest_metadata::WorkerEnv;

fn main() -> Result<()> {
    color_eyre::install()?;

    let file: Utf8PathBuf = std::env::args()
        .next_back()
        .ok_or_else(|| eyre!("usage: fake-worker [ARGS]... <FILE>"))?
        .into();
    let env = WorkerEnv::from_env()?;
    if env.unit_file != file.as_str() {
        return Err(eyre!(
            "unit file mismatch: {} in the environment, {file} on the command line",
            env.unit_file,
        ));
    }

    let scenario = Scenario::read_from(&file)?;
    let script = scenario
        .script_for(env.attempt)
        .ok_or_else(|| eyre!("scenario `{file}` has no attempts"))?;

    eprintln!("fake-worker: {file} attempt {}/{}", env.attempt, env.total_attempts);
    let exit_code = script.play(file.as_str(), &env.options, std::io::stdout().lock())?;
    std::process::exit(exit_code)
}
