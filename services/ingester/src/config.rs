//! Ingester configuration loading.
//!
//! A YAML file (optional) provides the pipeline configuration. `${VAR}` and
//! `${VAR:-default}` references are expanded before parsing (see
//! [`expand_env`]), then `NBM_*` and `ZARR_*` environment variables override
//! individual fields.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use ingestion::PipelineConfig;
use zarr_store::StoreConfig;

/// Load the pipeline configuration from `path`, or from the environment alone.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let expanded = expand_env(&content)
                .with_context(|| format!("Failed to expand variables in {:?}", path))?;
            PipelineConfig::from_yaml_str(&expanded)
                .with_context(|| format!("Failed to parse config from {:?}", path))?
        }
        None => PipelineConfig {
            store: StoreConfig::from_env(),
            ..PipelineConfig::default()
        },
    };

    config.apply_env();
    config.validate().context("Invalid pipeline configuration")?;
    Ok(config)
}

type Lookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

/// Expand `${VAR}`, `${VAR:-default}` and `$$` in configuration text.
///
/// Defaults may hold further references, so `${A:-${B:-x}}` falls back to
/// `B` and then to `x`. A default is only resolved when it is used, and is
/// also used for a variable set to the empty string. Comment lines are
/// copied unchanged.
pub fn expand_env(content: &str) -> Result<String> {
    expand_with(content, &|name| std::env::var(name).ok())
}

fn expand_with(content: &str, lookup: &Lookup) -> Result<String> {
    let mut out = String::with_capacity(content.len());
    for (index, line) in content.split_inclusive('\n').enumerate() {
        if line.trim_start().starts_with('#') {
            out.push_str(line);
            continue;
        }
        let (expanded, _) = expand_until(line, false, lookup)
            .with_context(|| format!("line {}", index + 1))?;
        out.push_str(&expanded);
    }
    Ok(out)
}

/// Expand `text` to its end, or when `nested` up to the `}` closing a
/// default. Returns the expansion and the text after it.
fn expand_until<'s>(mut rest: &'s str, nested: bool, lookup: &Lookup) -> Result<(String, &'s str)> {
    let mut out = String::new();
    loop {
        let pos = match rest.find(|c: char| c == '$' || (nested && c == '}')) {
            Some(pos) => pos,
            None if nested => bail!("unclosed '${{' reference"),
            None => {
                out.push_str(rest);
                return Ok((out, ""));
            }
        };
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix('}') {
            return Ok((out, after));
        } else if let Some(after) = tail.strip_prefix("$$") {
            out.push('$');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("${") {
            let (value, after) = substitute(after, lookup)?;
            out.push_str(&value);
            rest = after;
        } else {
            out.push('$');
            rest = &tail[1..];
        }
    }
}

/// Resolve one reference; `text` starts just after its `${`.
fn substitute<'s>(text: &'s str, lookup: &Lookup) -> Result<(String, &'s str)> {
    let name_len = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    let (name, tail) = text.split_at(name_len);
    if name.is_empty() {
        bail!("empty variable name in '${{{}'", tail.trim_end());
    }

    let value = lookup(name);
    if let Some(after) = tail.strip_prefix('}') {
        let value = value.with_context(|| format!("environment variable {} not set", name))?;
        return Ok((value, after));
    }
    if let Some(after) = tail.strip_prefix(":-") {
        return match value.filter(|v| !v.is_empty()) {
            Some(value) => {
                // skip the unused default without resolving it
                let (_, after) = expand_until(after, true, &|_| Some(String::new()))?;
                Ok((value, after))
            }
            None => expand_until(after, true, lookup),
        };
    }
    bail!("malformed reference to {}", name)
}
