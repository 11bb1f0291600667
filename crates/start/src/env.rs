//! Environment shared between the startup stages and the launched services.
//!
//! The environment is seeded from the process environment, written during startup
//! (target network, deployed contract addresses) and then handed by shared reference to
//! every service the supervisor launches. Child processes receive exactly this mapping.

use std::collections::BTreeMap;

/// Chain id the application should target. Unset means the local development chain.
pub const CHAIN_NETWORK_ID: &str = "CHAIN_NETWORK_ID";
/// Symbolic network name written back for downstream tooling.
pub const TARGET_NETWORK: &str = "TARGET_NETWORK";
/// Preferred port of the asset server.
pub const PORT: &str = "PORT";
/// Host the asset server binds to.
pub const HOST: &str = "HOST";
/// `"true"` selects `https` when displaying the asset server URL.
pub const HTTPS: &str = "HTTPS";
/// Build-mode flags read by the front-end tooling.
pub const BUILD_MODE_VARS: [&str; 2] = ["BABEL_ENV", "NODE_ENV"];
/// The only build mode this entry point runs in.
pub const BUILD_MODE: &str = "development";
/// Default name of the variable selecting the deployer account.
pub const DEFAULT_DEPLOYER_ACCOUNT_INDEX_VAR: &str = "DEPLOYER_ACCOUNT_INDEX";

/// Key/value environment consumed by the launched services.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentState {
    vars: BTreeMap<String, String>,
}

impl EnvironmentState {
    /// Snapshot the current process environment.
    ///
    /// Variables whose name or value is not valid unicode are skipped.
    pub fn from_process() -> Self {
        std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Like [`EnvironmentState::get`], but treats an empty value as unset.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|value| !value.is_empty())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Set a variable, returning the previous value if any.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.vars.insert(key.into(), value.into())
    }

    /// Merge variables in, overwriting existing keys.
    pub fn merge<K, V>(&mut self, vars: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.vars
            .extend(vars.into_iter().map(|(key, value)| (key.into(), value.into())));
    }

    /// Force the build-mode flags to `development`.
    pub fn set_build_mode(&mut self) {
        for var in BUILD_MODE_VARS {
            self.set(var, BUILD_MODE);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvironmentState {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut env = Self::default();
        env.merge(iter);
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overwrites_existing_keys() {
        let mut env: EnvironmentState = [("TOKEN_ADDRESS", "0x01"), ("PORT", "3000")]
            .into_iter()
            .collect();

        env.merge([("TOKEN_ADDRESS", "0x02"), ("ADJUDICATOR_ADDRESS", "0x03")]);

        assert_eq!(env.get("TOKEN_ADDRESS"), Some("0x02"));
        assert_eq!(env.get("ADJUDICATOR_ADDRESS"), Some("0x03"));
        assert_eq!(env.get(PORT), Some("3000"));
        assert_eq!(env.len(), 3);
    }

    #[test]
    fn test_empty_values_are_unset_for_get_non_empty() {
        let env: EnvironmentState = [(HOST, "")].into_iter().collect();

        assert_eq!(env.get(HOST), Some(""));
        assert_eq!(env.get_non_empty(HOST), None);
    }

    #[test]
    fn test_set_build_mode() {
        let mut env: EnvironmentState = [("NODE_ENV", "production")].into_iter().collect();
        env.set_build_mode();

        assert_eq!(env.get("NODE_ENV"), Some("development"));
        assert_eq!(env.get("BABEL_ENV"), Some("development"));
    }
}
