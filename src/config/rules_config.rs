use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveTime;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::errors::ConfigError;
use crate::domain::risk::auth_loss_guard::AuthLossGuard;
use crate::domain::risk::cooldown_after_loss::{
    CooldownAfterLoss, CooldownAfterLossConfig, LossTier,
};
use crate::domain::risk::daily_realized_loss::{DailyRealizedLoss, DailyRealizedLossConfig};
use crate::domain::risk::daily_unrealized_loss::{DailyUnrealizedLoss, DailyUnrealizedLossConfig};
use crate::domain::risk::max_contracts::{ContractLimitMode, MaxContracts, MaxContractsConfig};
use crate::domain::risk::max_contracts_per_instrument::{
    MaxContractsPerInstrument, PerInstrumentConfig, UnknownSymbolPolicy,
};
use crate::domain::risk::max_unrealized_profit::{MaxUnrealizedProfit, MaxUnrealizedProfitConfig};
use crate::domain::risk::no_stop_loss_grace::{NoStopLossGrace, StopLossGraceConfig};
use crate::domain::risk::rule::RiskRule;
use crate::domain::risk::session_block::{SessionBlockConfig, SessionBlockOutside};
use crate::domain::risk::symbol_blocks::{SymbolBlocks, SymbolBlocksConfig};
use crate::domain::risk::trade_frequency::{
    TradeFrequencyConfig, TradeFrequencyLimit, WindowLimit,
};
use crate::domain::risk::trade_management::{TradeManagement, TradeManagementConfig};
use crate::domain::session::SessionWindow;
use crate::domain::types::AccountId;

/// Mirror of [`ContractLimitMode`] with a YAML spelling.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitModeSpec {
    #[default]
    ReduceToLimit,
    CloseAll,
}

impl From<LimitModeSpec> for ContractLimitMode {
    fn from(spec: LimitModeSpec) -> Self {
        match spec {
            LimitModeSpec::ReduceToLimit => ContractLimitMode::ReduceToLimit,
            LimitModeSpec::CloseAll => ContractLimitMode::CloseAll,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownSymbolSpec {
    Block,
    #[default]
    AllowUnlimited,
    /// Requires `unknown_symbol_limit` alongside.
    AllowWithLimit,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WindowLimitSpec {
    pub max_trades: u32,
    pub cooldown_minutes: i64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LossTierSpec {
    pub loss_amount: Decimal,
    pub cooldown_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowSpec {
    pub start: String,
    pub end: String,
}

/// One entry of the ordered `rules:` list. Rule evaluation order is the
/// order entries appear in the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RuleSpec {
    MaxContracts {
        limit: u32,
        #[serde(default)]
        mode: LimitModeSpec,
    },
    MaxContractsPerInstrument {
        #[serde(default)]
        limits: HashMap<String, u32>,
        #[serde(default)]
        unknown_symbols: UnknownSymbolSpec,
        #[serde(default)]
        unknown_symbol_limit: Option<u32>,
        #[serde(default)]
        mode: LimitModeSpec,
    },
    DailyRealizedLoss {
        limit: Decimal,
    },
    DailyUnrealizedLoss {
        limit: Decimal,
    },
    MaxUnrealizedProfit {
        limit: Decimal,
    },
    TradeFrequencyLimit {
        #[serde(default)]
        per_minute: Option<WindowLimitSpec>,
        #[serde(default)]
        per_hour: Option<WindowLimitSpec>,
        #[serde(default)]
        per_session: Option<WindowLimitSpec>,
    },
    CooldownAfterLoss {
        tiers: Vec<LossTierSpec>,
    },
    NoStopLossGrace {
        grace_period_seconds: u64,
    },
    SessionBlockOutside {
        session_start: String,
        session_end: String,
        #[serde(default)]
        overrides: HashMap<String, WindowSpec>,
        #[serde(default)]
        close_at_session_end: bool,
    },
    AuthLossGuard {},
    SymbolBlocks {
        blocked_symbols: Vec<String>,
    },
    TradeManagement {
        breakeven_trigger_ticks: u32,
        trailing_activation_ticks: u32,
        trailing_distance_ticks: u32,
    },
}

impl RuleSpec {
    pub fn id(&self) -> &'static str {
        match self {
            RuleSpec::MaxContracts { .. } => "max_contracts",
            RuleSpec::MaxContractsPerInstrument { .. } => "max_contracts_per_instrument",
            RuleSpec::DailyRealizedLoss { .. } => "daily_realized_loss",
            RuleSpec::DailyUnrealizedLoss { .. } => "daily_unrealized_loss",
            RuleSpec::MaxUnrealizedProfit { .. } => "max_unrealized_profit",
            RuleSpec::TradeFrequencyLimit { .. } => "trade_frequency_limit",
            RuleSpec::CooldownAfterLoss { .. } => "cooldown_after_loss",
            RuleSpec::NoStopLossGrace { .. } => "no_stop_loss_grace",
            RuleSpec::SessionBlockOutside { .. } => "session_block_outside",
            RuleSpec::AuthLossGuard {} => "auth_loss_guard",
            RuleSpec::SymbolBlocks { .. } => "symbol_blocks",
            RuleSpec::TradeManagement { .. } => "trade_management",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RulesFile {
    #[serde(default = "default_timezone")]
    timezone: String,
    #[serde(default = "default_rollover")]
    rollover: String,
    #[serde(default = "default_quote_max_age")]
    quote_max_age_seconds: u64,
    rules: Vec<RuleSpec>,
    /// Full per-account replacement of the default rule list.
    #[serde(default)]
    accounts: HashMap<AccountId, Vec<RuleSpec>>,
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

fn default_rollover() -> String {
    "17:00".to_string()
}

fn default_quote_max_age() -> u64 {
    10
}

/// Parsed rule configuration: global session settings plus the ordered rule
/// list per account.
#[derive(Debug, Clone)]
pub struct RulesConfig {
    pub timezone: Tz,
    pub rollover: NaiveTime,
    pub quote_max_age: chrono::Duration,
    defaults: Vec<RuleSpec>,
    overrides: HashMap<AccountId, Vec<RuleSpec>>,
}

impl RulesConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::UnreadableFile {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        let file: RulesFile =
            serde_yaml::from_str(&raw).map_err(|e| ConfigError::UnreadableFile {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?;

        let timezone = Tz::from_str(&file.timezone).map_err(|_| ConfigError::UnreadableFile {
            path: path.display().to_string(),
            detail: format!("unknown timezone `{}`", file.timezone),
        })?;
        let rollover = parse_time(&file.rollover).ok_or_else(|| ConfigError::UnreadableFile {
            path: path.display().to_string(),
            detail: format!("rollover `{}` is not HH:MM", file.rollover),
        })?;

        Ok(Self {
            timezone,
            rollover,
            quote_max_age: chrono::Duration::seconds(file.quote_max_age_seconds as i64),
            defaults: file.rules,
            overrides: file.accounts,
        })
    }

    pub fn specs_for(&self, account_id: AccountId) -> &[RuleSpec] {
        self.overrides
            .get(&account_id)
            .map(Vec::as_slice)
            .unwrap_or(&self.defaults)
    }

    /// Instantiates the ordered rule list for one account, validating every
    /// option along the way.
    pub fn build_rules(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Box<dyn RiskRule>>, ConfigError> {
        self.specs_for(account_id)
            .iter()
            .map(|spec| build_rule(spec, account_id))
            .collect()
    }
}

fn build_rule(
    spec: &RuleSpec,
    account_id: AccountId,
) -> Result<Box<dyn RiskRule>, ConfigError> {
    let invalid = |field: &'static str, detail: String| ConfigError::InvalidRuleField {
        account_id,
        rule: spec.id(),
        field,
        detail,
    };

    match spec {
        RuleSpec::MaxContracts { limit, mode } => {
            if *limit == 0 {
                return Err(invalid("limit", "must be at least 1".to_string()));
            }
            Ok(Box::new(MaxContracts::new(MaxContractsConfig {
                limit: *limit,
                mode: (*mode).into(),
            })))
        }
        RuleSpec::MaxContractsPerInstrument {
            limits,
            unknown_symbols,
            unknown_symbol_limit,
            mode,
        } => {
            let unknown_policy = match (unknown_symbols, unknown_symbol_limit) {
                (UnknownSymbolSpec::Block, _) => UnknownSymbolPolicy::Block,
                (UnknownSymbolSpec::AllowUnlimited, _) => UnknownSymbolPolicy::AllowUnlimited,
                (UnknownSymbolSpec::AllowWithLimit, Some(limit)) => {
                    UnknownSymbolPolicy::AllowWithLimit(*limit)
                }
                (UnknownSymbolSpec::AllowWithLimit, None) => {
                    return Err(invalid(
                        "unknown_symbol_limit",
                        "required when unknown_symbols is allow_with_limit".to_string(),
                    ));
                }
            };
            Ok(Box::new(MaxContractsPerInstrument::new(
                PerInstrumentConfig {
                    limits: limits.clone(),
                    unknown_policy,
                    mode: (*mode).into(),
                },
            )))
        }
        RuleSpec::DailyRealizedLoss { limit } => {
            if limit.is_sign_positive() || limit.is_zero() {
                return Err(invalid("limit", "must be negative".to_string()));
            }
            Ok(Box::new(DailyRealizedLoss::new(DailyRealizedLossConfig {
                limit: *limit,
            })))
        }
        RuleSpec::DailyUnrealizedLoss { limit } => {
            if limit.is_sign_positive() || limit.is_zero() {
                return Err(invalid("limit", "must be negative".to_string()));
            }
            Ok(Box::new(DailyUnrealizedLoss::new(
                DailyUnrealizedLossConfig { limit: *limit },
            )))
        }
        RuleSpec::MaxUnrealizedProfit { limit } => {
            if limit.is_sign_negative() || limit.is_zero() {
                return Err(invalid("limit", "must be positive".to_string()));
            }
            Ok(Box::new(MaxUnrealizedProfit::new(
                MaxUnrealizedProfitConfig { limit: *limit },
            )))
        }
        RuleSpec::TradeFrequencyLimit {
            per_minute,
            per_hour,
            per_session,
        } => {
            if per_minute.is_none() && per_hour.is_none() && per_session.is_none() {
                return Err(invalid(
                    "per_minute",
                    "at least one window limit must be set".to_string(),
                ));
            }
            let window = |spec: &Option<WindowLimitSpec>| -> Result<Option<WindowLimit>, ConfigError> {
                spec.map(|s| {
                    if s.cooldown_minutes <= 0 {
                        Err(invalid("cooldown_minutes", "must be positive".to_string()))
                    } else {
                        Ok(WindowLimit {
                            max_trades: s.max_trades,
                            cooldown: chrono::Duration::minutes(s.cooldown_minutes),
                        })
                    }
                })
                .transpose()
            };
            Ok(Box::new(TradeFrequencyLimit::new(TradeFrequencyConfig {
                per_minute: window(per_minute)?,
                per_hour: window(per_hour)?,
                per_session: window(per_session)?,
            })))
        }
        RuleSpec::CooldownAfterLoss { tiers } => {
            if tiers.is_empty() {
                return Err(invalid("tiers", "must not be empty".to_string()));
            }
            let tiers = tiers
                .iter()
                .map(|t| {
                    if t.loss_amount <= Decimal::ZERO {
                        Err(invalid(
                            "loss_amount",
                            "must be a positive magnitude".to_string(),
                        ))
                    } else if t.cooldown_minutes <= 0 {
                        Err(invalid("cooldown_minutes", "must be positive".to_string()))
                    } else {
                        Ok(LossTier {
                            loss_amount: t.loss_amount,
                            cooldown: chrono::Duration::minutes(t.cooldown_minutes),
                        })
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Box::new(CooldownAfterLoss::new(CooldownAfterLossConfig {
                tiers,
            })))
        }
        RuleSpec::NoStopLossGrace {
            grace_period_seconds,
        } => {
            if *grace_period_seconds == 0 {
                return Err(invalid(
                    "grace_period_seconds",
                    "must be positive".to_string(),
                ));
            }
            Ok(Box::new(NoStopLossGrace::new(StopLossGraceConfig {
                grace_period: std::time::Duration::from_secs(*grace_period_seconds),
            })))
        }
        RuleSpec::SessionBlockOutside {
            session_start,
            session_end,
            overrides,
            close_at_session_end,
        } => {
            let window = parse_window(session_start, session_end)
                .ok_or_else(|| invalid("session_start", "times must be HH:MM".to_string()))?;
            let overrides = overrides
                .iter()
                .map(|(symbol, w)| {
                    parse_window(&w.start, &w.end)
                        .map(|w| (symbol.clone(), w))
                        .ok_or_else(|| invalid("overrides", format!("{}: times must be HH:MM", symbol)))
                })
                .collect::<Result<HashMap<_, _>, _>>()?;
            Ok(Box::new(SessionBlockOutside::new(SessionBlockConfig {
                window,
                overrides,
                close_at_session_end: *close_at_session_end,
            })))
        }
        RuleSpec::AuthLossGuard {} => Ok(Box::new(AuthLossGuard::new())),
        RuleSpec::SymbolBlocks { blocked_symbols } => {
            Ok(Box::new(SymbolBlocks::new(SymbolBlocksConfig {
                blocked_symbols: blocked_symbols.iter().cloned().collect(),
            })))
        }
        RuleSpec::TradeManagement {
            breakeven_trigger_ticks,
            trailing_activation_ticks,
            trailing_distance_ticks,
        } => {
            if *trailing_distance_ticks == 0 {
                return Err(invalid(
                    "trailing_distance_ticks",
                    "must be positive".to_string(),
                ));
            }
            if trailing_activation_ticks < breakeven_trigger_ticks {
                return Err(invalid(
                    "trailing_activation_ticks",
                    "must be >= breakeven_trigger_ticks".to_string(),
                ));
            }
            Ok(Box::new(TradeManagement::new(TradeManagementConfig {
                breakeven_trigger_ticks: *breakeven_trigger_ticks,
                trailing_activation_ticks: *trailing_activation_ticks,
                trailing_distance_ticks: *trailing_distance_ticks,
            })))
        }
    }
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

fn parse_window(start: &str, end: &str) -> Option<SessionWindow> {
    Some(SessionWindow {
        open: parse_time(start)?,
        close: parse_time(end)?,
    })
}
