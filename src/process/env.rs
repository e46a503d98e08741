//! # Explicit child environment.
//!
//! Children never inherit implicitly: the supervisor clears the command
//! environment and sets every variable itself. Layers apply in order, later
//! layers win:
//!
//! ```text
//! parent env (vars_os) ─► shared overrides (SERVICE_URL_*, ...) ─► ServiceSpec::env
//! ```

use std::collections::BTreeMap;
use std::ffi::OsString;

use crate::model::ServiceSpec;

/// Environment builder for spawned processes.
#[derive(Clone, Debug, Default)]
pub struct Environment {
    vars: BTreeMap<OsString, OsString>,
}

impl Environment {
    /// Snapshot of the supervising process environment.
    pub fn inherit() -> Self {
        Self {
            vars: std::env::vars_os().collect(),
        }
    }

    /// Empty environment.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Layers `vars` on top; existing keys are replaced.
    pub fn layer<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.vars
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn get(&self, key: &str) -> Option<&OsString> {
        self.vars.get(&OsString::from(key))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OsString, &OsString)> {
        self.vars.iter()
    }
}

/// `SERVICE_URL_<NAME>` / `SERVICE_PORT_<NAME>` for every service with a declared port.
///
/// Names are uppercased with `-` and `.` replaced by `_`.
pub fn service_urls(specs: &[ServiceSpec], host: &str) -> Vec<(String, String)> {
    specs
        .iter()
        .filter_map(|spec| spec.port.map(|port| (env_key(&spec.name), port)))
        .flat_map(|(key, port)| {
            [
                (format!("SERVICE_URL_{key}"), format!("http://{host}:{port}")),
                (format!("SERVICE_PORT_{key}"), port.to_string()),
            ]
        })
        .collect()
}

fn env_key(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '-' | '.' | ' ' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_layers_win() {
        let env = Environment::empty()
            .layer([("PORT", "3000"), ("HOST", "localhost")])
            .layer([("PORT", "4000")]);
        assert_eq!(env.get("PORT"), Some(&OsString::from("4000")));
        assert_eq!(env.get("HOST"), Some(&OsString::from("localhost")));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn inherit_copies_parent_environment() {
        let env = Environment::inherit();
        assert_eq!(env.len(), std::env::vars_os().count());
    }

    #[test]
    fn service_urls_for_declared_ports_only() {
        let specs = vec![
            ServiceSpec::new("api-server", "cargo").with_port(8080),
            ServiceSpec::new("worker", "cargo"),
        ];
        let vars = service_urls(&specs, "localhost");
        assert_eq!(
            vars,
            vec![
                (
                    "SERVICE_URL_API_SERVER".to_string(),
                    "http://localhost:8080".to_string()
                ),
                ("SERVICE_PORT_API_SERVER".to_string(), "8080".to_string()),
            ]
        );
    }
}
