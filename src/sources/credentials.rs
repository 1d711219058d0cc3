//! Credential lookup at call time
//!
//! The engine never parses or stores credentials; it asks a provider for an opaque
//! token right before each call and passes it through unchanged.

use std::collections::HashMap;

use crate::config::SourcesConfig;
use crate::models::SourceKind;

/// Yields an opaque key or token per source call
pub trait CredentialProvider: Send + Sync + std::fmt::Debug {
    fn credential(&self, source: SourceKind) -> Option<String>;
}

/// Reads credentials from named environment variables on every call
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    vars: HashMap<SourceKind, String>,
}

impl EnvCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `source`'s credential from `var`
    pub fn with_var(mut self, source: SourceKind, var: impl Into<String>) -> Self {
        self.vars.insert(source, var.into());
        self
    }

    /// Variables named by `sources.*.api_key_env`
    pub fn from_config(sources: &SourcesConfig) -> Self {
        SourceKind::all()
            .into_iter()
            .fold(Self::new(), |creds, kind| match &sources.get(kind).api_key_env {
                Some(var) => creds.with_var(kind, var.clone()),
                None => creds,
            })
    }
}

impl CredentialProvider for EnvCredentials {
    fn credential(&self, source: SourceKind) -> Option<String> {
        let var = self.vars.get(&source)?;
        std::env::var(var).ok().filter(|v| !v.trim().is_empty())
    }
}

/// Fixed credentials, for tests and embedding
#[derive(Clone, Default)]
pub struct StaticCredentials {
    values: HashMap<SourceKind, String>,
}

impl std::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("sources", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: SourceKind, value: impl Into<String>) -> Self {
        self.values.insert(source, value.into());
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn credential(&self, source: SourceKind) -> Option<String> {
        self.values.get(&source).cloned()
    }
}
