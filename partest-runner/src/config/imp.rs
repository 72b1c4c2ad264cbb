// Copyright (c) The partest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::MaxParallel,
    errors::{ConfigParseError, ConfigParseErrorKind, ProfileNotFound},
    reporter::ReporterKind,
};
use camino::Utf8Path;
use config::{Config, ConfigBuilder, File, FileFormat, builder::DefaultState};
use partest_metadata::{SuiteOptions, ThreadOptions};
use serde::Deserialize;
use std::{collections::HashMap, sync::LazyLock, time::Duration};
use tracing::warn;

/// Gets the number of available CPUs and caches the value.
#[inline]
pub fn get_num_cpus() -> usize {
    static NUM_CPUS: LazyLock<usize> =
        LazyLock::new(|| match std::thread::available_parallelism() {
            Ok(count) => count.into(),
            Err(err) => {
                warn!("unable to determine num-cpus ({err}), assuming 1 logical CPU");
                1
            }
        });

    *NUM_CPUS
}

/// Overall configuration for partest.
///
/// This is the root data structure for partest configuration. Most runner-specific configuration
/// is managed through [profiles](PartestProfile), obtained through the [`profile`](Self::profile)
/// method.
#[derive(Clone, Debug)]
pub struct PartestConfig {
    inner: PartestConfigImpl,
}

impl PartestConfig {
    /// The default location of the config within a directory: `.config/partest.toml`.
    pub const CONFIG_PATH: &'static str = ".config/partest.toml";

    /// Contains the default config as a TOML file.
    ///
    /// User configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// The name of the default profile.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Reads the partest config from the given file, or if not specified from
    /// `.config/partest.toml` in `dir`.
    ///
    /// If no config file is specified and `dir` doesn't have `.config/partest.toml`, uses the
    /// default config options.
    pub fn from_sources(
        dir: impl AsRef<Utf8Path>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = dir.as_ref().join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let inner = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(config_file, kind))?;
        Ok(Self { inner })
    }

    /// Returns the default partest config.
    pub fn default_config() -> Self {
        let inner = Self::build_and_deserialize_config(&Self::make_default_config())
            .expect("default config is always valid");
        Self { inner }
    }

    /// Returns the worker configuration.
    pub fn worker(&self) -> &WorkerConfig {
        &self.inner.worker
    }

    /// Returns the profile with the given name, or an error if a profile was specified but not
    /// found.
    pub fn profile(&self, name: impl AsRef<str>) -> Result<PartestProfile<'_>, ProfileNotFound> {
        let name = name.as_ref();
        let custom_profile = self.inner.profiles.get(name)?;
        Ok(PartestProfile {
            name: name.to_owned(),
            default_profile: &self.inner.profiles.default,
            custom_profile,
        })
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<PartestConfigImpl, ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        serde_path_to_error::deserialize(config)
            .map_err(|error| ConfigParseErrorKind::DeserializeError(Box::new(error)))
    }
}

/// The worker program that runs a single unit.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerConfig {
    /// The program to run.
    pub program: String,

    /// Arguments passed before the unit file.
    #[serde(default)]
    pub args: Vec<String>,

    /// How long to wait for the worker's output pipes to close after it exits.
    ///
    /// A worker that leaves a process behind holding its pipes open is considered to have leaked
    /// them, and is not waited on past this period.
    #[serde(
        default = "WorkerConfig::default_leak_timeout",
        with = "humantime_serde"
    )]
    pub leak_timeout: Duration,
}

impl WorkerConfig {
    /// The leak timeout used when none is configured.
    pub const DEFAULT_LEAK_TIMEOUT: Duration = Duration::from_millis(100);

    /// Creates a worker config with the default leak timeout.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            leak_timeout: Self::DEFAULT_LEAK_TIMEOUT,
        }
    }

    fn default_leak_timeout() -> Duration {
        Self::DEFAULT_LEAK_TIMEOUT
    }
}

/// A configuration profile for partest. Contains most configuration used by the runner.
///
/// Returned by [`PartestConfig::profile`].
#[derive(Clone, Debug)]
pub struct PartestProfile<'cfg> {
    name: String,
    default_profile: &'cfg DefaultProfileImpl,
    custom_profile: Option<&'cfg CustomProfileImpl>,
}

macro_rules! profile_field {
    ($self:ident, $field:ident) => {
        $self
            .custom_profile
            .and_then(|profile| profile.$field.clone())
            .unwrap_or_else(|| $self.default_profile.$field.clone())
    };
}

impl<'cfg> PartestProfile<'cfg> {
    /// Returns the name of the profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of units that may run at the same time.
    pub fn max_parallel(&self) -> MaxParallel {
        profile_field!(self, max_parallel)
    }

    /// Returns the number of times a failing unit is retried.
    pub fn retries(&self) -> u32 {
        profile_field!(self, retries)
    }

    /// Returns the per-test timeout, or `None` if timeouts are disabled.
    pub fn timeout(&self) -> Option<Duration> {
        let timeout: Duration = profile_field!(self, timeout);
        (!timeout.is_zero()).then_some(timeout)
    }

    /// Returns the duration after which a test is reported as slow.
    pub fn slow_timeout(&self) -> Duration {
        profile_field!(self, slow_timeout)
    }

    /// Returns the reporter to use.
    pub fn reporter(&self) -> ReporterKind {
        profile_field!(self, reporter)
    }

    /// Returns the test title filter, if any.
    pub fn grep(&self) -> Option<&'cfg str> {
        self.custom_profile
            .and_then(|profile| profile.grep.as_deref())
            .or(self.default_profile.grep.as_deref())
    }

    /// Returns the options passed to every worker.
    pub fn thread_options(&self) -> ThreadOptions {
        ThreadOptions {
            timeout_ms: self.timeout().map(|t| t.as_millis() as u64),
            slow_ms: Some(self.slow_timeout().as_millis() as u64),
            grep: self.grep().map(ToOwned::to_owned),
            delay: profile_field!(self, delay),
            exit_immediately: profile_field!(self, exit),
            requires: profile_field!(self, require),
            compilers: profile_field!(self, compilers),
            suite_options: SuiteOptions {
                bail: profile_field!(self, bail),
                forbid_only: profile_field!(self, forbid_only),
                forbid_pending: profile_field!(self, forbid_pending),
                full_stack_trace: profile_field!(self, full_trace),
                async_only: profile_field!(self, async_only),
                check_leaks: profile_field!(self, check_leaks),
            },
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PartestConfigImpl {
    worker: WorkerConfig,
    #[serde(rename = "profile")]
    profiles: PartestProfilesImpl,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PartestProfilesImpl {
    default: DefaultProfileImpl,
    #[serde(flatten)]
    other: HashMap<String, CustomProfileImpl>,
}

impl PartestProfilesImpl {
    fn get(&self, profile: &str) -> Result<Option<&CustomProfileImpl>, ProfileNotFound> {
        let custom_profile = match profile {
            PartestConfig::DEFAULT_PROFILE => None,
            other => Some(
                self.other
                    .get(other)
                    .ok_or_else(|| ProfileNotFound::new(profile, self.all_profiles()))?,
            ),
        };
        Ok(custom_profile)
    }

    fn all_profiles(&self) -> impl Iterator<Item = &str> {
        self.other
            .keys()
            .map(|key| key.as_str())
            .chain(std::iter::once(PartestConfig::DEFAULT_PROFILE))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DefaultProfileImpl {
    max_parallel: MaxParallel,
    retries: u32,
    #[serde(with = "humantime_serde")]
    timeout: Duration,
    #[serde(with = "humantime_serde")]
    slow_timeout: Duration,
    reporter: ReporterKind,
    #[serde(default)]
    grep: Option<String>,
    require: Vec<String>,
    compilers: Vec<String>,
    delay: bool,
    exit: bool,
    bail: bool,
    forbid_only: bool,
    forbid_pending: bool,
    full_trace: bool,
    async_only: bool,
    check_leaks: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CustomProfileImpl {
    #[serde(default)]
    max_parallel: Option<MaxParallel>,
    #[serde(default)]
    retries: Option<u32>,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    slow_timeout: Option<Duration>,
    #[serde(default)]
    reporter: Option<ReporterKind>,
    #[serde(default)]
    grep: Option<String>,
    #[serde(default)]
    require: Option<Vec<String>>,
    #[serde(default)]
    compilers: Option<Vec<String>>,
    #[serde(default)]
    delay: Option<bool>,
    #[serde(default)]
    exit: Option<bool>,
    #[serde(default)]
    bail: Option<bool>,
    #[serde(default)]
    forbid_only: Option<bool>,
    #[serde(default)]
    forbid_pending: Option<bool>,
    #[serde(default)]
    full_trace: Option<bool>,
    #[serde(default)]
    async_only: Option<bool>,
    #[serde(default)]
    check_leaks: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn default_config_is_valid() {
        let default_config = PartestConfig::default_config();
        let profile = default_config
            .profile(PartestConfig::DEFAULT_PROFILE)
            .expect("default profile should exist");
        assert_eq!(profile.max_parallel(), MaxParallel::NumUnits);
        assert_eq!(profile.retries(), 0);
        assert_eq!(profile.timeout(), Some(Duration::from_secs(2)));
        assert_eq!(profile.reporter(), ReporterKind::Spec);
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = PartestConfig::from_sources(dir.path(), None).unwrap();
        assert_eq!(config.worker().program, "partest-worker");
    }

    #[test_case(
        "",
        (0, Some(Duration::from_secs(2))),
        None

        ; "empty config is expected to use the hardcoded values"
    )]
    #[test_case(
        indoc! {r#"
            [profile.default]
            retries = 2
            timeout = "10s"
        "#},
        (2, Some(Duration::from_secs(10))),
        None

        ; "overrides the default profile"
    )]
    #[test_case(
        indoc! {r#"
            [profile.default]
            retries = 1

            [profile.ci]
            timeout = "0s"
        "#},
        (1, Some(Duration::from_secs(2))),
        Some((1, None))

        ; "custom profile inherits and disables timeouts"
    )]
    fn retries_and_timeouts(
        config_contents: &str,
        expected_default: (u32, Option<Duration>),
        expected_ci: Option<(u32, Option<Duration>)>,
    ) {
        let dir = tempdir().unwrap();
        let config_dir = dir.path().join(".config");
        std::fs::create_dir(&config_dir).unwrap();
        std::fs::write(config_dir.join("partest.toml"), config_contents).unwrap();

        let config = PartestConfig::from_sources(dir.path(), None).unwrap();
        let default = config.profile("default").unwrap();
        assert_eq!((default.retries(), default.timeout()), expected_default);

        match expected_ci {
            Some(expected) => {
                let ci = config.profile("ci").unwrap();
                assert_eq!((ci.retries(), ci.timeout()), expected);
            }
            None => {
                let error = config.profile("ci").unwrap_err();
                assert_eq!(error.profile(), "ci");
            }
        }
    }

    #[test]
    fn thread_options_from_profile() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("partest.toml");
        std::fs::write(
            &config_path,
            indoc! {r#"
                [worker]
                program = "node"
                args = ["worker.js"]
                leak-timeout = "250ms"

                [profile.strict]
                grep = "@slow"
                require = ["setup.js"]
                forbid-only = true
                full-trace = true
                exit = true
            "#},
        )
        .unwrap();

        let config = PartestConfig::from_sources(dir.path(), Some(&config_path)).unwrap();
        assert_eq!(
            config.worker(),
            &WorkerConfig {
                program: "node".to_owned(),
                args: vec!["worker.js".to_owned()],
                leak_timeout: Duration::from_millis(250),
            }
        );

        let options = config.profile("strict").unwrap().thread_options();
        assert_eq!(
            options,
            ThreadOptions {
                timeout_ms: Some(2000),
                slow_ms: Some(75),
                grep: Some("@slow".to_owned()),
                delay: false,
                exit_immediately: true,
                requires: vec!["setup.js".to_owned()],
                compilers: vec![],
                suite_options: SuiteOptions {
                    forbid_only: true,
                    full_stack_trace: true,
                    ..Default::default()
                },
            }
        );
    }

    #[test]
    fn invalid_config_reports_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("partest.toml");
        std::fs::write(&config_path, "[profile.default]\nretries = \"many\"\n").unwrap();

        let error = PartestConfig::from_sources(dir.path(), Some(&config_path)).unwrap_err();
        assert_eq!(error.config_file(), config_path.as_path());
        assert!(
            matches!(error.kind(), ConfigParseErrorKind::DeserializeError(_)),
            "unexpected error kind: {:?}",
            error.kind()
        );
    }
}
