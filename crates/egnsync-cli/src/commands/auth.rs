//! Auth command - Manage the stored token set
//!
//! The refresh token is obtained out of band (for example from the Egnyte
//! developer console). `set-token` exchanges it once to prove it works and
//! stores the resulting token set in the system keyring.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Subcommand;
use egnsync_core::config::Config;
use egnsync_core::ports::Token;
use egnsync_remote::{KeyringTokenStorage, OAuthConfig, OAuthRefresher};
use serde_json::json;

use super::CommandContext;

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Show whether a token is stored and when it expires
    Status,
    /// Exchange a refresh token and store the result
    SetToken {
        /// Refresh token issued for this client
        refresh_token: String,
    },
    /// Remove the stored token
    Logout,
}

fn describe(token: &Token) -> serde_json::Value {
    let remaining = (token.expires_at - Utc::now()).num_seconds();
    json!({
        "expires_at": token.expires_at.to_rfc3339(),
        "expired": token.is_expired(),
        "expires_in_secs": remaining.max(0),
        "has_refresh_token": token.refresh_token.is_some(),
    })
}

impl AuthCommand {
    pub async fn execute(&self, ctx: &CommandContext, config: &Config) -> Result<()> {
        if config.remote.domain.is_empty() {
            bail!("remote.domain is not configured");
        }
        let domain = config.remote.domain.clone();
        let fmt = ctx.formatter();

        match self {
            Self::Status => {
                let stored = {
                    let domain = domain.clone();
                    tokio::task::spawn_blocking(move || KeyringTokenStorage::load(&domain)).await??
                };
                if ctx.is_json() {
                    let mut value = json!({"domain": domain, "authenticated": stored.is_some()});
                    if let Some(token) = &stored {
                        value["token"] = describe(token);
                    }
                    fmt.print_json(&value);
                    return Ok(());
                }
                match stored {
                    None => fmt.warn(&format!(
                        "No token stored for {domain}; run `egnsync auth set-token <refresh_token>`"
                    )),
                    Some(token) => {
                        fmt.success(&format!("Token stored for {domain}"));
                        if token.is_expired() {
                            fmt.info("Access token: expired (refreshed on next use)");
                        } else {
                            fmt.info(&format!(
                                "Access token expires: {}",
                                token.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
                            ));
                        }
                        let refresh = if token.refresh_token.is_some() { "yes" } else { "no" };
                        fmt.info(&format!("Refresh token: {refresh}"));
                    }
                }
            }
            Self::SetToken { refresh_token } => {
                let refresher = OAuthRefresher::new(&OAuthConfig::from_config(config))?;
                let token = refresher
                    .refresh(refresh_token)
                    .await
                    .context("Token endpoint rejected the refresh token")?;
                let stored = token.clone();
                let target = domain.clone();
                tokio::task::spawn_blocking(move || KeyringTokenStorage::store(&target, &stored))
                    .await??;

                if ctx.is_json() {
                    fmt.print_json(&json!({"domain": domain, "token": describe(&token)}));
                } else {
                    fmt.success(&format!("Token stored for {domain}"));
                    fmt.info(&format!(
                        "Access token expires: {}",
                        token.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
                    ));
                }
            }
            Self::Logout => {
                let target = domain.clone();
                tokio::task::spawn_blocking(move || KeyringTokenStorage::clear(&target)).await??;
                if ctx.is_json() {
                    fmt.print_json(&json!({"domain": domain, "logged_out": true}));
                } else {
                    fmt.success(&format!("Removed stored token for {domain}"));
                }
            }
        }
        Ok(())
    }
}
