//! JAVA_HOME selection for the spawned server process.

use std::ffi::OsString;
use std::path::PathBuf;

/// How `JAVA_HOME` is set for the server process.
#[derive(Debug, Clone, Default)]
pub enum JavaHomeOption {
    /// Do not set the variable; the server falls back to whatever the
    /// environment provides
    #[default]
    UseSystem,
    /// Forward the `JAVA_HOME` of the process running the tests
    Inherit,
    /// An explicit path, e.g. `/usr/lib/jvm/java-11-openjdk-amd64`
    Path(PathBuf),
}

impl JavaHomeOption {
    /// The value to set `JAVA_HOME` to, or `None` to leave it alone.
    pub fn resolve(&self) -> Option<OsString> {
        match self {
            Self::UseSystem => None,
            Self::Inherit => std::env::var_os("JAVA_HOME"),
            Self::Path(path) => Some(path.clone().into_os_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn use_system_sets_nothing() {
        assert!(JavaHomeOption::UseSystem.resolve().is_none());
    }

    #[test]
    fn explicit_path_is_used_verbatim() {
        let option = JavaHomeOption::Path(PathBuf::from("/opt/jdk-11"));
        assert_eq!(option.resolve().unwrap(), OsString::from("/opt/jdk-11"));
    }
}
