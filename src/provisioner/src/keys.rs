// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Token signing keys for tenant auth APIs.

use std::fmt;

use base64::Engine;
use hearth_ore::task::{self, JoinHandleExt};
use openssl::bn::BigNumRef;
use openssl::rsa::Rsa;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, UpstreamComponent};

const RSA_BITS: u32 = 2048;

/// A JSON Web Key holding an RSA key.
///
/// The private components are only present in private keys.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub alg: String,
    pub n: String,
    pub e: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
}

impl fmt::Debug for Jwk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .field("private", &self.d.is_some())
            .finish_non_exhaustive()
    }
}

impl Jwk {
    /// Returns the key without its private components.
    pub fn to_public(&self) -> Jwk {
        Jwk {
            d: None,
            p: None,
            q: None,
            dp: None,
            dq: None,
            qi: None,
            ..self.clone()
        }
    }
}

/// A freshly generated signing keypair.
#[derive(Debug, Clone)]
pub struct SigningKeys {
    pub kid: String,
    pub public_jwk: Jwk,
    pub private_jwk: Jwk,
}

impl SigningKeys {
    /// Generates an RSA keypair identified by a random key ID, off the async
    /// worker threads.
    pub async fn generate() -> Result<SigningKeys, Error> {
        task::spawn_blocking(|| "generate-signing-keys", SigningKeys::generate_blocking)
            .wait_and_assert_finished()
            .await
            .unwrap_or(Err(Error::Cancelled))
    }

    fn generate_blocking() -> Result<SigningKeys, Error> {
        let kid = Uuid::new_v4().to_string();
        let rsa = Rsa::generate(RSA_BITS)
            .map_err(|e| Error::upstream(UpstreamComponent::SigningKeys, e))?;

        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let encode = |n: &BigNumRef| engine.encode(n.to_vec());
        let component = |name: &str, n: Option<&BigNumRef>| {
            n.map(encode).ok_or_else(|| {
                Error::upstream(
                    UpstreamComponent::SigningKeys,
                    format!("generated key lacks {name}"),
                )
            })
        };

        let private_jwk = Jwk {
            kty: "RSA".into(),
            kid: kid.clone(),
            key_use: "sig".into(),
            alg: "RS256".into(),
            n: encode(rsa.n()),
            e: encode(rsa.e()),
            d: Some(encode(rsa.d())),
            p: Some(component("p", rsa.p())?),
            q: Some(component("q", rsa.q())?),
            dp: Some(component("dp", rsa.dmp1())?),
            dq: Some(component("dq", rsa.dmq1())?),
            qi: Some(component("qi", rsa.iqmp())?),
        };
        let public_jwk = private_jwk.to_public();
        Ok(SigningKeys {
            kid,
            public_jwk,
            private_jwk,
        })
    }

    /// Returns the public key set, as served to token verifiers.
    pub fn public_jwks_json(&self) -> String {
        serde_json::json!({ "keys": [&self.public_jwk] }).to_string()
    }

    /// Returns the statement seeding the keypair into the auth database's
    /// `jwks` table. Running it twice inserts the key once.
    pub fn seed_sql(&self) -> String {
        // Serializing plain structs of strings cannot fail.
        let public = serde_json::to_string(&self.public_jwk).unwrap_or_default();
        let private = serde_json::to_string(&self.private_jwk).unwrap_or_default();
        format!(
            "INSERT INTO jwks (id, public_key, private_key, created_at) \
             VALUES ({}, {}, {}, now()) ON CONFLICT (id) DO NOTHING;\n",
            quote_literal(&self.kid),
            quote_literal(&public),
            quote_literal(&private),
        )
    }
}

/// Quotes `s` as a SQL string literal.
fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generated_keys_share_kid() {
        let keys = SigningKeys::generate().await.unwrap();
        assert_eq!(keys.public_jwk.kid, keys.kid);
        assert_eq!(keys.private_jwk.kid, keys.kid);
        assert_eq!(keys.public_jwk.n, keys.private_jwk.n);
        assert!(keys.public_jwk.d.is_none());
        assert!(keys.private_jwk.qi.is_some());
        // URL-safe and unpadded.
        assert!(!keys.public_jwk.n.contains(['=', '+', '/']));
    }

    #[tokio::test]
    async fn public_jwks_has_no_private_components() {
        let keys = SigningKeys::generate().await.unwrap();
        let jwks: serde_json::Value = serde_json::from_str(&keys.public_jwks_json()).unwrap();
        let key = &jwks["keys"][0];
        assert_eq!(key["kty"], "RSA");
        assert_eq!(key["use"], "sig");
        assert_eq!(key["alg"], "RS256");
        assert!(key.get("d").is_none());
    }

    #[tokio::test]
    async fn seed_sql_escapes_literals() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        let keys = SigningKeys::generate().await.unwrap();
        let sql = keys.seed_sql();
        assert!(sql.starts_with("INSERT INTO jwks (id, public_key, private_key, created_at)"));
        assert!(sql.contains(&format!("VALUES ('{}', '{{", keys.kid)));
        assert!(sql.trim_end().ends_with("ON CONFLICT (id) DO NOTHING;"));
    }
}
