// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Configuration of a tenant's auth API.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The sign-in methods the auth API supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Email,
    Google,
    Github,
    Discord,
}

impl AuthProvider {
    pub const ALL: [AuthProvider; 4] = [
        AuthProvider::Email,
        AuthProvider::Google,
        AuthProvider::Github,
        AuthProvider::Discord,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProvider::Email => "email",
            AuthProvider::Google => "google",
            AuthProvider::Github => "github",
            AuthProvider::Discord => "discord",
        }
    }

    /// Reports whether the provider is an OAuth provider that needs a client
    /// ID and secret.
    pub fn is_oauth(&self) -> bool {
        !matches!(self, AuthProvider::Email)
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            AuthProvider::Email => "EMAIL",
            AuthProvider::Google => "GOOGLE",
            AuthProvider::Github => "GITHUB",
            AuthProvider::Discord => "DISCORD",
        }
    }

    pub fn enabled_env(&self) -> String {
        format!("{}_ENABLED", self.env_prefix())
    }

    pub fn client_id_env(&self) -> String {
        format!("{}_CLIENT_ID", self.env_prefix())
    }

    pub fn client_secret_env(&self) -> String {
        format!("{}_CLIENT_SECRET", self.env_prefix())
    }
}

impl fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<AuthProvider, String> {
        AuthProvider::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown auth provider {s:?}"))
    }
}

/// The settings of one auth provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthProviderSetting {
    pub provider: AuthProvider,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

impl fmt::Debug for AuthProviderSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthProviderSetting")
            .field("provider", &self.provider)
            .field("enabled", &self.enabled)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AuthProviderSetting {
    /// Checks that only OAuth providers carry client credentials.
    pub fn validate(&self) -> Result<(), String> {
        if !self.provider.is_oauth() && (self.client_id.is_some() || self.client_secret.is_some())
        {
            return Err(format!(
                "auth provider {} does not accept client credentials",
                self.provider
            ));
        }
        Ok(())
    }

    /// Returns the environment variables that configure this provider on the
    /// auth API.
    pub fn env(&self) -> Vec<(String, String)> {
        let mut env = vec![(self.provider.enabled_env(), self.enabled.to_string())];
        if let Some(client_id) = &self.client_id {
            env.push((self.provider.client_id_env(), client_id.clone()));
        }
        if let Some(client_secret) = &self.client_secret {
            env.push((self.provider.client_secret_env(), client_secret.clone()));
        }
        env
    }
}

/// The environment variable holding the auth API's session signing secret.
pub const AUTH_SECRET_ENV: &str = "AUTH_SECRET";
/// The environment variable holding the comma-separated trusted origins.
pub const TRUSTED_ORIGINS_ENV: &str = "TRUSTED_ORIGINS";
/// The environment variable holding the proxy URL the auth API sits behind.
pub const PROXY_URL_ENV: &str = "PROXY_URL";

/// The full configuration of a tenant's auth API, used when creating its
/// deployment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthApiConfig {
    pub auth_secret: String,
    pub trusted_origins: Vec<String>,
    pub proxy_url: Option<String>,
    pub providers: Vec<AuthProviderSetting>,
}

impl AuthApiConfig {
    /// Returns the literal environment variables of the auth API container,
    /// in a stable order.
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(AUTH_SECRET_ENV.to_owned(), self.auth_secret.clone());
        env.insert(TRUSTED_ORIGINS_ENV.to_owned(), self.trusted_origins.join(","));
        if let Some(proxy_url) = &self.proxy_url {
            env.insert(PROXY_URL_ENV.to_owned(), proxy_url.clone());
        }
        for provider in &self.providers {
            env.extend(provider.env());
        }
        env
    }
}

/// A partial update to a tenant's auth API. Fields that are `None` or empty
/// leave the corresponding environment variables untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthApiPatch {
    pub trusted_origins: Option<Vec<String>>,
    pub proxy_url: Option<String>,
    pub providers: Vec<AuthProviderSetting>,
}

impl AuthApiPatch {
    /// Reports whether applying the patch would change nothing.
    pub fn is_empty(&self) -> bool {
        self.trusted_origins.is_none() && self.proxy_url.is_none() && self.providers.is_empty()
    }

    /// Returns the environment variables to set, in a stable order.
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if let Some(origins) = &self.trusted_origins {
            env.insert(TRUSTED_ORIGINS_ENV.to_owned(), origins.join(","));
        }
        if let Some(proxy_url) = &self.proxy_url {
            env.insert(PROXY_URL_ENV.to_owned(), proxy_url.clone());
        }
        for provider in &self.providers {
            env.extend(provider.env());
        }
        env
    }
}
