// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Command-line parsing utilities.

use std::fmt::Display;
use std::str::FromStr;

use clap::{Command, Parser};

/// A help template for use with clap that does not include the name of the
/// binary or the version in the help output.
const NO_VERSION_HELP_TEMPLATE: &str = "{about}

USAGE:
    {usage}

{all-args}";

/// Configures command-line parsing via [`parse_args`].
#[derive(Debug, Default, Clone)]
pub struct CliConfig<'a> {
    /// An optional prefix to apply to the environment variable name for all
    /// arguments with an environment variable fallback.
    pub env_prefix: Option<&'a str>,
    /// Enable clap's built-in `--version` flag.
    pub enable_version_flag: bool,
}

/// Parses command-line arguments according to a clap `Parser` after
/// applying hearth-specific customizations.
pub fn parse_args<O>(config: CliConfig) -> O
where
    O: Parser,
{
    let mut clap = O::command().args_override_self(true);

    if !config.enable_version_flag {
        clap = clap
            .disable_version_flag(true)
            .help_template(NO_VERSION_HELP_TEMPLATE);
    }

    if let Some(prefix) = config.env_prefix {
        clap = apply_env_prefix(clap, prefix);
    }

    let matches = clap.get_matches();
    match O::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(e) => e.exit(),
    }
}

/// Prepends `prefix` to the environment variable of every argument that has
/// one.
fn apply_env_prefix(command: Command, prefix: &str) -> Command {
    command.mut_args(|arg| {
        let env = arg
            .get_env()
            .and_then(|env| env.to_str())
            .map(|env| format!("{prefix}{env}"));
        match env {
            Some(env) => arg.env(env),
            None => arg,
        }
    })
}

/// A command-line argument of the form `KEY=VALUE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValueArg<K, V> {
    /// The key of the command-line argument.
    pub key: K,
    /// The value of the command-line argument.
    pub value: V,
}

impl<K, V> FromStr for KeyValueArg<K, V>
where
    K: FromStr,
    K::Err: Display,
    V: FromStr,
    V::Err: Display,
{
    type Err = String;

    fn from_str(s: &str) -> Result<KeyValueArg<K, V>, String> {
        let Some((key, value)) = s.split_once('=') else {
            return Err("must have format KEY=VALUE".to_string());
        };
        Ok(KeyValueArg {
            key: key.parse().map_err(|e| format!("parsing key: {}", e))?,
            value: value.parse().map_err(|e| format!("parsing value: {}", e))?,
        })
    }
}
