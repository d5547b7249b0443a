//! `<suite>.toml` Schema
//!
//! [`SuiteConfig`] is the top-level item of the optional sidecar file next to a suite document,
//! e.g. `tests/data/check-basic.toml` for `tests/data/check-basic.test`.

use std::collections::BTreeMap;

/// Top-level data in `<suite>.toml` files
#[derive(Clone, Default, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct SuiteConfig {
    /// Checker to run for every case
    pub(crate) bin: Option<Bin>,
    /// Arguments given to the checker before the primary source's file name
    pub(crate) args: Option<Args>,
    #[serde(default)]
    pub(crate) env: Env,
    #[serde(default)]
    #[serde(deserialize_with = "humantime_serde::deserialize")]
    pub(crate) timeout: Option<std::time::Duration>,
    /// Maximum number of check-and-rewrite attempts
    pub(crate) attempts: Option<usize>,
    /// File name the primary source is written under
    pub(crate) main: Option<String>,
}

impl SuiteConfig {
    pub fn load(path: &std::path::Path) -> Result<Self, crate::Error> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Self::parse_toml(&raw).map_err(|e| format!("{}: {}", path.display(), e).into())
    }

    /// Load the sidecar of `suite`, if present
    pub fn sidecar(suite: &std::path::Path) -> Result<Option<Self>, crate::Error> {
        let path = suite.with_extension("toml");
        if path.exists() {
            Self::load(&path).map(Some)
        } else {
            Ok(None)
        }
    }

    fn parse_toml(s: &str) -> Result<Self, crate::Error> {
        toml_edit::de::from_str(s).map_err(|e| e.to_string().into())
    }

    /// Fill unset fields from `other`
    pub(crate) fn update(&mut self, other: &Self) {
        if self.bin.is_none() {
            self.bin.clone_from(&other.bin);
        }
        if self.args.is_none() {
            self.args.clone_from(&other.args);
        }
        self.env.update(&other.env);
        if self.timeout.is_none() {
            self.timeout = other.timeout;
        }
        if self.attempts.is_none() {
            self.attempts = other.attempts;
        }
        if self.main.is_none() {
            self.main.clone_from(&other.main);
        }
    }

    pub(crate) fn push_arg(&mut self, arg: String) {
        let mut args = self.args.take().map(Args::into_vec).unwrap_or_default();
        args.push(arg);
        self.args = Some(Args::Split(args));
    }

    pub fn attempts(&self) -> usize {
        self.attempts.unwrap_or(crate::controller::DEFAULT_ATTEMPTS)
    }

    pub(crate) fn to_driver(
        &self,
        bins: &crate::BinRegistry,
    ) -> Result<crate::driver::CommandDriver, crate::Error> {
        let bin = self
            .bin
            .clone()
            .ok_or_else(|| crate::Error::new("No checker specified"))?;
        let path = match bins.resolve_bin(bin)? {
            Bin::Path(path) => path,
            Bin::Name(name) => {
                return Err(crate::Error::new(format!("Unknown bin.name = {name}")));
            }
            Bin::Error(err) => return Err(err),
        };

        let mut driver = crate::driver::CommandDriver::new(path)
            .env(self.env.clone())
            .timeout(self.timeout);
        if let Some(args) = self.args.clone() {
            driver = driver.args(args.into_vec());
        }
        if let Some(main) = &self.main {
            driver = driver.main(main);
        }
        Ok(driver)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(untagged)]
pub(crate) enum Args {
    Joined(JoinedArgs),
    Split(Vec<String>),
}

impl Args {
    fn as_slice(&self) -> &[String] {
        match self {
            Self::Joined(j) => j.inner.as_slice(),
            Self::Split(v) => v.as_slice(),
        }
    }

    fn into_vec(self) -> Vec<String> {
        match self {
            Self::Joined(j) => j.inner,
            Self::Split(v) => v,
        }
    }
}

impl std::ops::Deref for Args {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

/// Shell-style argument string, e.g. `--strict --python-version '3.12'`
#[derive(Clone, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub(crate) struct JoinedArgs {
    inner: Vec<String>,
}

impl JoinedArgs {
    #[allow(clippy::inherent_to_string_shadow_display)]
    fn to_string(&self) -> String {
        shlex::try_join(self.inner.iter().map(|s| s.as_str())).unwrap_or_default()
    }
}

impl std::str::FromStr for JoinedArgs {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = shlex::Shlex::new(s).collect();
        Ok(Self { inner })
    }
}

impl std::fmt::Display for JoinedArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.to_string().fmt(f)
    }
}

impl<'de> serde::de::Deserialize<'de> for JoinedArgs {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        std::str::FromStr::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl serde::ser::Serialize for JoinedArgs {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Describe the checker's environment
#[derive(Clone, Default, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct Env {
    #[serde(default)]
    pub(crate) inherit: Option<bool>,
    #[serde(default)]
    pub(crate) add: BTreeMap<String, String>,
    #[serde(default)]
    pub(crate) remove: Vec<String>,
}

impl Env {
    pub(crate) fn update(&mut self, other: &Self) {
        if self.inherit.is_none() {
            self.inherit = other.inherit;
        }
        for (key, value) in &other.add {
            self.add.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self.remove.extend(other.remove.iter().cloned());
    }

    pub(crate) fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.add.insert(key.into(), value.into());
    }

    pub(crate) fn apply(&self, mut command: snapbox::cmd::Command) -> snapbox::cmd::Command {
        if !self.inherit() {
            command = command.env_clear();
        }
        for remove in &self.remove {
            command = command.env_remove(remove);
        }
        command.envs(&self.add)
    }

    pub(crate) fn inherit(&self) -> bool {
        self.inherit.unwrap_or(true)
    }
}

/// Checker under test
#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub enum Bin {
    Path(std::path::PathBuf),
    Name(String),
    #[serde(skip)]
    Error(crate::Error),
}

impl From<std::path::PathBuf> for Bin {
    fn from(other: std::path::PathBuf) -> Self {
        Self::Path(other)
    }
}

impl<'a> From<&'a std::path::PathBuf> for Bin {
    fn from(other: &'a std::path::PathBuf) -> Self {
        Self::Path(other.clone())
    }
}

impl<'a> From<&'a std::path::Path> for Bin {
    fn from(other: &'a std::path::Path) -> Self {
        Self::Path(other.to_owned())
    }
}

impl<P, E> From<Result<P, E>> for Bin
where
    P: Into<Bin>,
    E: std::fmt::Display,
{
    fn from(other: Result<P, E>) -> Self {
        match other {
            Ok(path) => path.into(),
            Err(err) => Bin::Error(crate::Error::new(err.to_string())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_empty() {
        let actual = SuiteConfig::parse_toml("").unwrap();
        assert_eq!(actual, SuiteConfig::default());
        assert_eq!(actual.attempts(), crate::controller::DEFAULT_ATTEMPTS);
    }

    #[test]
    fn parse_full() {
        let actual = SuiteConfig::parse_toml(
            r#"
bin.name = "checker-fixture"
args = "--strict --name 'with space'"
timeout = "5s"
attempts = 5
main = "main.py"

[env]
inherit = false
add.LANG = "C"
remove = ["PYTHONPATH"]
"#,
        )
        .unwrap();
        let expected = SuiteConfig {
            bin: Some(Bin::Name("checker-fixture".into())),
            args: Some(Args::Joined(JoinedArgs {
                inner: vec!["--strict".into(), "--name".into(), "with space".into()],
            })),
            env: Env {
                inherit: Some(false),
                add: [("LANG".to_owned(), "C".to_owned())].into_iter().collect(),
                remove: vec!["PYTHONPATH".into()],
            },
            timeout: Some(std::time::Duration::from_secs(5)),
            attempts: Some(5),
            main: Some("main.py".into()),
        };
        assert_eq!(actual, expected);
    }

    #[test]
    fn parse_split_args() {
        let actual = SuiteConfig::parse_toml(r#"args = ["--strict", "with space"]"#).unwrap();
        assert_eq!(
            actual.args.as_deref(),
            Some(&["--strict".to_owned(), "with space".to_owned()][..])
        );
    }

    #[test]
    fn parse_unknown_field() {
        assert!(SuiteConfig::parse_toml("attempt = 3").is_ok());
        assert!(SuiteConfig::parse_toml("attempts = \"three\"").is_err());
    }

    #[test]
    fn update_prefers_self() {
        let mut config = SuiteConfig {
            attempts: Some(1),
            env: Env {
                add: [("A".to_owned(), "mine".to_owned())].into_iter().collect(),
                ..Default::default()
            },
            ..Default::default()
        };
        let defaults = SuiteConfig {
            bin: Some(Bin::Name("checker".into())),
            attempts: Some(3),
            timeout: Some(std::time::Duration::from_secs(1)),
            env: Env {
                inherit: Some(false),
                add: [
                    ("A".to_owned(), "theirs".to_owned()),
                    ("B".to_owned(), "theirs".to_owned()),
                ]
                .into_iter()
                .collect(),
                remove: vec![],
            },
            ..Default::default()
        };
        config.update(&defaults);
        assert_eq!(config.bin, Some(Bin::Name("checker".into())));
        assert_eq!(config.attempts, Some(1));
        assert_eq!(config.timeout, Some(std::time::Duration::from_secs(1)));
        assert_eq!(config.env.inherit, Some(false));
        assert_eq!(config.env.add["A"], "mine");
        assert_eq!(config.env.add["B"], "theirs");
    }

    #[test]
    fn sidecar_is_optional() {
        let root = tempfile::tempdir().unwrap();
        let suite = root.path().join("check-basic.test");
        assert_eq!(SuiteConfig::sidecar(&suite).unwrap(), None);

        std::fs::write(root.path().join("check-basic.toml"), "attempts = 7\n").unwrap();
        let actual = SuiteConfig::sidecar(&suite).unwrap().unwrap();
        assert_eq!(actual.attempts(), 7);
    }

    #[test]
    fn driver_requires_bin() {
        let bins = crate::BinRegistry::new();
        let err = SuiteConfig::default().to_driver(&bins).unwrap_err();
        assert!(err.to_string().contains("No checker"), "{err}");
    }

    #[test]
    fn driver_from_path() {
        let bins = crate::BinRegistry::new();
        let config = SuiteConfig {
            bin: Some(Bin::Path("/usr/bin/checker".into())),
            main: Some("main.py".into()),
            ..Default::default()
        };
        let driver = config.to_driver(&bins).unwrap();
        assert_eq!(driver.bin(), std::path::Path::new("/usr/bin/checker"));
        assert_eq!(crate::driver::Driver::main_file(&driver), "main.py");
    }
}
