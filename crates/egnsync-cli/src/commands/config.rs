//! Config command - View, edit and validate configuration
//!
//! `set` rewrites the YAML config file and nothing else; a running `watch`
//! picks the change up on its next start.

use anyhow::{bail, Result};
use clap::Subcommand;
use egnsync_core::config::Config;
use serde_json::Value;

use super::{save_config, CommandContext};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration (client secret redacted)
    Show,
    /// Check the configuration for errors
    Validate,
    /// Print one setting, e.g. `sync.workers`
    Get { key: String },
    /// Change one setting and save the config file
    Set { key: String, value: String },
    /// Print every single-valued setting as `key = value`
    List,
}

/// Settings whose value is never printed
const SECRET_KEYS: &[&str] = &["auth.client_secret"];

const REDACTED: &str = "********";

/// Effective config as a JSON value with the client secret masked
fn redacted(config: &Config) -> Result<Value> {
    let mut value = serde_json::to_value(config)?;
    if let Some(secret) = value.pointer_mut("/auth/client_secret") {
        if !secret.is_null() {
            *secret = Value::String(REDACTED.to_string());
        }
    }
    Ok(value)
}

/// Masks secret settings that are set
fn display_value(key: &str, value: &serde_yaml::Value) -> serde_yaml::Value {
    if SECRET_KEYS.contains(&key) && !value.is_null() {
        serde_yaml::Value::String(REDACTED.to_string())
    } else {
        value.clone()
    }
}

/// Scalar rendered without YAML document markers
fn render(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Null => "~".to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

impl ConfigCommand {
    pub async fn execute(&self, ctx: &CommandContext, config: &Config) -> Result<()> {
        match self {
            Self::Show => self.show(ctx, config),
            Self::Validate => self.validate(ctx, config),
            Self::Get { key } => self.get(ctx, config, key),
            Self::Set { key, value } => self.set(ctx, config, key, value),
            Self::List => self.list(ctx, config),
        }
    }

    fn get(&self, ctx: &CommandContext, config: &Config, key: &str) -> Result<()> {
        let Some(value) = config.get_value(key)? else {
            bail!("Unknown configuration key '{key}'");
        };
        let value = display_value(key, &value);
        if ctx.is_json() {
            ctx.formatter()
                .print_json(&serde_json::json!({ "key": key, "value": serde_json::to_value(&value)? }));
        } else {
            println!("{}", render(&value));
        }
        Ok(())
    }

    fn set(&self, ctx: &CommandContext, config: &Config, key: &str, raw: &str) -> Result<()> {
        let mut edited = config.clone();
        edited.set_value(key, raw)?;
        save_config(ctx, config, &edited)?;

        let shown = match edited.get_value(key)? {
            Some(value) => render(&display_value(key, &value)),
            None => raw.to_string(),
        };
        let fmt = ctx.formatter();
        if ctx.is_json() {
            fmt.print_json(&serde_json::json!({
                "success": true,
                "key": key,
                "value": shown,
                "config_path": ctx.config_path().display().to_string(),
            }));
        } else {
            fmt.success(&format!("Set {key} = {shown}"));
            fmt.info(&format!("Saved to {}", ctx.config_path().display()));
        }
        Ok(())
    }

    fn list(&self, ctx: &CommandContext, config: &Config) -> Result<()> {
        let entries: Vec<(String, serde_yaml::Value)> = config
            .entries()?
            .into_iter()
            .map(|(key, value)| {
                let value = display_value(&key, &value);
                (key, value)
            })
            .collect();

        if ctx.is_json() {
            let mut map = serde_json::Map::new();
            for (key, value) in &entries {
                map.insert(key.clone(), serde_json::to_value(value)?);
            }
            ctx.formatter().print_json(&Value::Object(map));
        } else {
            for (key, value) in &entries {
                println!("{key} = {}", render(value));
            }
        }
        Ok(())
    }

    fn show(&self, ctx: &CommandContext, config: &Config) -> Result<()> {
        let value = redacted(config)?;
        if ctx.is_json() {
            ctx.formatter().print_json(&value);
        } else {
            println!("# {}", ctx.config_path().display());
            print!("{}", serde_yaml::to_string(&value)?);
        }
        Ok(())
    }

    fn validate(&self, ctx: &CommandContext, config: &Config) -> Result<()> {
        let fmt = ctx.formatter();
        let errors = config.validate();

        if ctx.is_json() {
            fmt.print_json(&serde_json::json!({
                "valid": errors.is_empty(),
                "errors": errors
                    .iter()
                    .map(|e| serde_json::json!({"field": e.field, "message": e.message}))
                    .collect::<Vec<_>>(),
            }));
        } else if errors.is_empty() {
            fmt.success(&format!(
                "Configuration is valid ({})",
                ctx.config_path().display()
            ));
        } else {
            for error in &errors {
                fmt.error(&format!("{}: {}", error.field, error.message));
            }
        }

        if !errors.is_empty() {
            bail!("Configuration has {} error(s)", errors.len());
        }
        Ok(())
    }
}
