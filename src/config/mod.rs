//! Configuration loading for the risk daemon.
//!
//! Endpoints and tunables come from the environment; accounts, rules, and
//! holidays come from YAML files. Any validation failure refuses startup
//! with an error naming the account and field at fault.

mod accounts_config;
mod holidays_config;
mod rules_config;

pub use accounts_config::{AccountConfig, load_accounts};
pub use holidays_config::load_holidays;
pub use rules_config::{RuleSpec, RulesConfig};

use crate::domain::session::HolidayCalendar;
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// Aggregated daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // Gateway endpoints
    pub api_base_url: String,
    pub hub_base_url: String,

    // Persistence
    pub database_url: String,

    // Enforcement executor
    pub executor_workers: usize,
    pub shutdown_grace_secs: u64,

    // Stream keep-alive
    pub heartbeat_secs: u64,

    // Operator files
    pub accounts: Vec<AccountConfig>,
    pub rules: RulesConfig,
    pub holidays: HolidayCalendar,
}

impl Config {
    /// Loads everything: environment first, then the three YAML files.
    pub fn load(
        accounts_path: Option<PathBuf>,
        rules_path: Option<PathBuf>,
        holidays_path: Option<PathBuf>,
    ) -> Result<Self> {
        let api_base_url =
            env::var("API_BASE_URL").context("API_BASE_URL must be set")?;
        let hub_base_url =
            env::var("HUB_BASE_URL").context("HUB_BASE_URL must be set")?;
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://data/riskguard.db".to_string());

        let executor_workers = parse_env("EXECUTOR_WORKERS", 4usize)?;
        let shutdown_grace_secs = parse_env("SHUTDOWN_GRACE_SECS", 5u64)?;
        let heartbeat_secs = parse_env("HEARTBEAT_SECS", 10u64)?;

        let accounts_path = accounts_path
            .or_else(|| env::var("ACCOUNTS_FILE").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/accounts.yaml"));
        let rules_path = rules_path
            .or_else(|| env::var("RULES_FILE").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/rules.yaml"));
        let holidays_path = holidays_path
            .or_else(|| env::var("HOLIDAYS_FILE").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/holidays.yaml"));

        let accounts = load_accounts(&accounts_path)?;
        let rules = RulesConfig::load(&rules_path)?;
        let holidays = load_holidays(&holidays_path)?;

        // Surface rule option errors per enabled account before starting
        // anything.
        for account in accounts.iter().filter(|a| a.enabled) {
            rules.build_rules(account.account_id)?;
        }

        Ok(Self {
            api_base_url,
            hub_base_url,
            database_url,
            executor_workers,
            shutdown_grace_secs,
            heartbeat_secs,
            accounts,
            rules,
            holidays,
        })
    }

    pub fn enabled_accounts(&self) -> impl Iterator<Item = &AccountConfig> {
        self.accounts.iter().filter(|a| a.enabled)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has invalid value `{}`", name, raw)),
        Err(_) => Ok(default),
    }
}
