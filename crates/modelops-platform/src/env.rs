//! Environment variable abstraction and native implementation.
//!
//! Config discovery reads `MODELOPS_CONFIG` through the [`Environment`]
//! trait so tests can substitute an in-memory map for the process
//! environment.

/// Read-only access to environment-style key-value configuration.
pub trait Environment: Send + Sync {
    /// Get the value of an environment variable, or `None` if it is not set.
    fn get_var(&self, name: &str) -> Option<String>;
}

/// Native environment implementation using [`std::env`].
pub struct NativeEnvironment;

impl Environment for NativeEnvironment {
    fn get_var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

/// Fixed key-value environment, for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct MapEnvironment {
    vars: std::collections::HashMap<String, String>,
}

impl MapEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }
}

impl Environment for MapEnvironment {
    fn get_var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_get_var_existing() {
        let env = NativeEnvironment;
        // PATH is universally available on all platforms
        assert!(env.get_var("PATH").is_some());
    }

    #[test]
    fn native_get_var_missing() {
        let env = NativeEnvironment;
        assert!(env.get_var("MODELOPS_DEFINITELY_NOT_SET_12345").is_none());
    }

    #[test]
    fn map_environment_lookup() {
        let env = MapEnvironment::new().with_var("MODELOPS_CONFIG", "/etc/modelops.json");
        assert_eq!(
            env.get_var("MODELOPS_CONFIG").as_deref(),
            Some("/etc/modelops.json")
        );
        assert!(env.get_var("HOME_X").is_none());
    }
}
