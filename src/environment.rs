//! Environment-variable contract between the server and the external
//! VCS process. The collaborator that launches the process injects
//! these assignments; the `hook` client reads them back to find and
//! authenticate against the server.

use std::env;

use thiserror::Error;

use crate::{
    auth::HookEnvironment,
    protocol::{HookRequest, HookType},
};

pub const ENV_HOST: &str = "HOOKGATE_HOST";
pub const ENV_PORT: &str = "HOOKGATE_PORT";
pub const ENV_CHALLENGE: &str = "HOOKGATE_CHALLENGE";
pub const ENV_BEARER: &str = "HOOKGATE_BEARER";
pub const ENV_TRANSACTION_ID: &str = "HOOKGATE_TRANSACTION_ID";
pub const ENV_REPOSITORY_ID: &str = "HOOKGATE_REPOSITORY_ID";
pub const ENV_NODE: &str = "HOOKGATE_NODE";
/// Mercurial exports the tip changeset under its own name.
pub const ENV_NODE_FALLBACK: &str = "HG_NODE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnvVarError {
    #[error("missing hook environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value in hook environment variable {0}")]
    Invalid(&'static str),
}

/// Everything one hook invocation needs to call back: socket address,
/// one-time challenge, bearer secret and correlation ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationEnv {
    pub host: String,
    pub port: u16,
    pub challenge: String,
    pub bearer: String,
    pub transaction_id: String,
    pub repository_id: String,
    pub node: Option<String>,
}

impl InvocationEnv {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        environment: &HookEnvironment,
        transaction_id: impl Into<String>,
        repository_id: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            challenge: environment.challenge().to_string(),
            bearer: environment.bearer().to_string(),
            transaction_id: transaction_id.into(),
            repository_id: repository_id.into(),
            node: None,
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// The assignments to inject into the external process.
    pub fn vars(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            (ENV_HOST, self.host.clone()),
            (ENV_PORT, self.port.to_string()),
            (ENV_CHALLENGE, self.challenge.clone()),
            (ENV_BEARER, self.bearer.clone()),
            (ENV_TRANSACTION_ID, self.transaction_id.clone()),
            (ENV_REPOSITORY_ID, self.repository_id.clone()),
        ];
        if let Some(node) = &self.node {
            vars.push((ENV_NODE, node.clone()));
        }
        vars
    }

    pub fn from_env() -> Result<Self, EnvVarError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the contract from any name-to-value mapping. The node
    /// honors [`ENV_NODE_FALLBACK`] when [`ENV_NODE`] is absent.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EnvVarError> {
        let require = |name: &'static str| lookup(name).ok_or(EnvVarError::Missing(name));

        let host = require(ENV_HOST)?;
        let port = require(ENV_PORT)?
            .parse::<u16>()
            .map_err(|_| EnvVarError::Invalid(ENV_PORT))?;
        let challenge = require(ENV_CHALLENGE)?;
        let bearer = require(ENV_BEARER)?;
        let transaction_id = require(ENV_TRANSACTION_ID)?;
        let repository_id = require(ENV_REPOSITORY_ID)?;
        let node = lookup(ENV_NODE).or_else(|| lookup(ENV_NODE_FALLBACK));

        Ok(Self {
            host,
            port,
            challenge,
            bearer,
            transaction_id,
            repository_id,
            node,
        })
    }

    /// The request this invocation's hook process sends back.
    pub fn to_request(&self, hook_type: HookType) -> HookRequest {
        HookRequest {
            secret: self.bearer.clone(),
            hook_type,
            transaction_id: self.transaction_id.clone(),
            repository_id: self.repository_id.clone(),
            challenge: self.challenge.clone(),
            node: self.node.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::HookAuthenticator;

    fn lookup_from<'a>(vars: &'a [(&'static str, String)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.clone())
        }
    }

    fn invocation() -> InvocationEnv {
        let authenticator = HookAuthenticator::new();
        let environment = authenticator.prepare();
        InvocationEnv::new("127.0.0.1", 7171, &environment, "ti21", "42")
    }

    #[test]
    fn round_trips_through_its_variable_assignments() {
        let invocation = invocation().with_node("abc");
        let vars = invocation.vars();

        let parsed = InvocationEnv::from_lookup(lookup_from(&vars)).unwrap();
        assert_eq!(parsed, invocation);
    }

    #[test]
    fn missing_variables_are_named() {
        let err = InvocationEnv::from_lookup(|_name| None).unwrap_err();
        assert_eq!(err, EnvVarError::Missing(ENV_HOST));
    }

    #[test]
    fn hg_node_is_honored_when_hookgate_node_is_absent() {
        let mut vars = invocation().vars();
        vars.push((ENV_NODE_FALLBACK, "abc".to_string()));

        let parsed = InvocationEnv::from_lookup(lookup_from(&vars)).unwrap();
        assert_eq!(parsed.node.as_deref(), Some("abc"));
    }

    #[test]
    fn ports_must_parse() {
        let mut vars = invocation().vars();
        for (name, value) in &mut vars {
            if *name == ENV_PORT {
                *value = "not-a-port".to_string();
            }
        }

        let err = InvocationEnv::from_lookup(lookup_from(&vars)).unwrap_err();
        assert_eq!(err, EnvVarError::Invalid(ENV_PORT));
    }

    #[test]
    fn requests_echo_credential_and_challenge() {
        let invocation = invocation().with_node("abc");
        let request = invocation.to_request(HookType::PreReceive);

        assert_eq!(request.secret, invocation.bearer);
        assert_eq!(request.challenge, invocation.challenge);
        assert_eq!(request.hook_type, HookType::PreReceive);
        assert_eq!(request.transaction_id, "ti21");
        assert_eq!(request.repository_id, "42");
        assert_eq!(request.node.as_deref(), Some("abc"));
    }
}
