//! CLI command modules.

pub mod http;
pub mod identity;
pub mod link;
pub mod load;
pub mod simulate;
pub mod status;

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result, bail};

/// Base URLs of the three daemon roles.
#[derive(Debug, Clone)]
pub struct Targets {
    pub dispatcher: String,
    pub agent: String,
    pub cache: String,
}

impl Default for Targets {
    fn default() -> Self {
        Self {
            dispatcher: "http://127.0.0.1:8082".into(),
            agent: "http://127.0.0.1:12345".into(),
            cache: "http://127.0.0.1:6380".into(),
        }
    }
}

/// `--name value` pairs trailing a subcommand.
#[derive(Debug, Default)]
pub struct Flags<'a> {
    values: HashMap<&'a str, &'a str>,
}

impl<'a> Flags<'a> {
    pub fn parse(args: &[&'a str]) -> Result<Self> {
        let mut values = HashMap::new();
        let mut iter = args.iter();
        while let Some(&arg) = iter.next() {
            let Some(name) = arg.strip_prefix("--") else {
                bail!("unexpected argument {arg:?}");
            };
            let value = *iter
                .next()
                .with_context(|| format!("--{name} requires a value"))?;
            values.insert(name, value);
        }
        Ok(Self { values })
    }

    pub fn get<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.values.get(name) {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("--{name}: invalid value {raw:?}")),
            None => Ok(default),
        }
    }
}

/// Split `namespace/name` into its two halves.
pub fn split_group(group: &str) -> Result<(&str, &str)> {
    match group.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((ns, name))
        }
        _ => bail!("group must be <namespace>/<name>, got {group:?}"),
    }
}
