use std::collections::HashMap;
use std::fmt::Debug;
use std::path::PathBuf;

/// Env provides environment variable and home directory access.
///
/// The default implementation reads the process environment; tests inject
/// [`StaticEnv`] to run hermetically.
pub trait Env: Debug + Send + Sync + 'static {
    /// Get an environment variable.
    ///
    /// Returns `None` if the variable is not set or is not valid utf-8.
    fn var(&self, key: &str) -> Option<String>;

    /// Returns all environment variables of the current process.
    fn vars(&self) -> HashMap<String, String>;

    /// Return the path to the user's home dir, `None` if unknown.
    fn home_dir(&self) -> Option<PathBuf>;
}

/// Implements Env for the OS context, both Unix style and Windows.
#[derive(Debug, Copy, Clone)]
pub struct OsEnv;

impl Env for OsEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn vars(&self) -> HashMap<String, String> {
        std::env::vars().collect()
    }

    #[cfg(any(unix, target_os = "redox"))]
    fn home_dir(&self) -> Option<PathBuf> {
        #[allow(deprecated)]
        std::env::home_dir()
    }

    #[cfg(windows)]
    fn home_dir(&self) -> Option<PathBuf> {
        std::env::var_os("USERPROFILE")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }
}

/// A fixed environment, used to mock the process environment.
#[derive(Debug, Clone, Default)]
pub struct StaticEnv {
    /// The home directory reported to callers.
    pub home_dir: Option<PathBuf>,
    /// The environment variables reported to callers.
    pub envs: HashMap<String, String>,
}

impl Env for StaticEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.envs.get(key).cloned()
    }

    fn vars(&self) -> HashMap<String, String> {
        self.envs.clone()
    }

    fn home_dir(&self) -> Option<PathBuf> {
        self.home_dir.clone()
    }
}

/// Evaluate a configuration string as a boolean.
///
/// `YES`/`TRUE`/`ON`/`1` are true, everything else (`NO`/`FALSE`/`OFF`/`0`
/// included) is false. Matching is case-insensitive.
pub fn truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_uppercase().as_str(),
        "YES" | "TRUE" | "ON" | "1"
    )
}
