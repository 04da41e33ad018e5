//! Wallet settings: per-network defaults overridden by a `walletd.conf`
//! style file of `key=value` lines.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use walletd_consensus::money::{Amount, COIN};
use walletd_consensus::{chain_params, ChainParams, Network};
use walletd_log::{Format, Level, LogConfig};

use crate::fees::FeePolicy;

pub const DEFAULT_PROPOSAL_LIFETIME: Duration = Duration::from_secs(3_600);
pub const DEFAULT_SELECTION_RETRIES: usize = 3;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    InvalidValue { key: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "{err}"),
            ConfigError::InvalidValue { key, message } => write!(f, "{key}: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletConfig {
    pub network: Network,
    pub pay_tx_fee_per_kb: Amount,
    pub min_relay_fee_per_kb: Amount,
    pub proposal_lifetime: Duration,
    pub selection_retries: usize,
    pub log_level: Level,
    pub log_format: Format,
    pub log_timestamps: bool,
}

impl WalletConfig {
    pub fn for_network(network: Network) -> Self {
        let params = chain_params(network);
        let log = LogConfig::default();
        Self {
            network,
            pay_tx_fee_per_kb: params.default_fee_per_kb,
            min_relay_fee_per_kb: params.min_relay_fee_per_kb,
            proposal_lifetime: DEFAULT_PROPOSAL_LIFETIME,
            selection_retries: DEFAULT_SELECTION_RETRIES,
            log_level: log.level,
            log_format: log.format,
            log_timestamps: log.timestamps,
        }
    }

    /// Defaults for the configured network with every recognised key
    /// applied. A missing file yields the mainnet defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let Some(conf) = load_conf(path)? else {
            return Ok(Self::for_network(Network::Mainnet));
        };
        Self::from_entries(&conf)
    }

    pub fn from_entries(conf: &HashMap<String, Vec<String>>) -> Result<Self, ConfigError> {
        let network = match last(conf, "network") {
            Some(value) => Network::parse(value).ok_or_else(|| invalid("network", value))?,
            None => Network::Mainnet,
        };
        let mut config = Self::for_network(network);

        if let Some(value) = last(conf, "paytxfee") {
            config.pay_tx_fee_per_kb = parse_fee_rate_per_kb(value)
                .map_err(|message| ConfigError::InvalidValue {
                    key: "paytxfee".to_string(),
                    message,
                })?;
        }
        if let Some(value) = last(conf, "minrelaytxfee") {
            config.min_relay_fee_per_kb = parse_fee_rate_per_kb(value)
                .map_err(|message| ConfigError::InvalidValue {
                    key: "minrelaytxfee".to_string(),
                    message,
                })?;
        }
        if let Some(value) = last(conf, "proposallifetime") {
            let secs = value
                .parse::<u64>()
                .map_err(|_| invalid("proposallifetime", value))?;
            config.proposal_lifetime = Duration::from_secs(secs);
        }
        if let Some(value) = last(conf, "selectionretries") {
            config.selection_retries = value
                .parse::<usize>()
                .map_err(|_| invalid("selectionretries", value))?;
        }
        if let Some(value) = last(conf, "loglevel") {
            config.log_level = Level::parse(value).ok_or_else(|| invalid("loglevel", value))?;
        }
        if let Some(value) = last(conf, "logformat") {
            config.log_format = Format::parse(value).ok_or_else(|| invalid("logformat", value))?;
        }
        if let Some(value) = last(conf, "logtimestamps") {
            config.log_timestamps =
                parse_conf_bool(value).ok_or_else(|| invalid("logtimestamps", value))?;
        }
        Ok(config)
    }

    pub fn chain_params(&self) -> ChainParams {
        chain_params(self.network)
    }

    pub fn fee_policy(&self) -> FeePolicy {
        FeePolicy::new(self.pay_tx_fee_per_kb, self.min_relay_fee_per_kb)
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level,
            format: self.log_format,
            timestamps: self.log_timestamps,
        }
    }
}

fn last<'a>(conf: &'a HashMap<String, Vec<String>>, key: &str) -> Option<&'a str> {
    conf.get(key)
        .and_then(|values| values.last())
        .map(String::as_str)
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("invalid value '{value}'"),
    }
}

/// Reads `key=value` lines; `#` and `;` start comments and a bare key means
/// `1`. Returns `None` when the file does not exist.
pub fn load_conf(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if let Some(idx) = line.find(['#', ';']) {
            line = line[..idx].trim();
        }
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    Ok(Some(out))
}

fn parse_conf_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Integer values are base units per kB; decimal values are coins.
fn parse_fee_rate_per_kb(value: &str) -> Result<Amount, String> {
    if value.contains('.') {
        return parse_amount(value);
    }
    let amount = value
        .parse::<i64>()
        .map_err(|_| format!("invalid fee rate '{value}'"))?;
    if amount < 0 {
        return Err("fee rate must be >= 0".to_string());
    }
    Ok(amount)
}

fn parse_amount(value: &str) -> Result<Amount, String> {
    let value = value.trim();
    if value.starts_with('-') {
        return Err("amount must be >= 0".to_string());
    }
    let (whole, frac) = value.split_once('.').unwrap_or((value, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(format!("invalid amount '{value}'"));
    }
    let whole = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<i64>()
            .map_err(|_| format!("invalid amount '{value}'"))?
    };
    if frac.len() > 8 {
        return Err(format!("amount has too many decimal places '{value}'"));
    }
    if !frac.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(format!("invalid amount '{value}'"));
    }
    let frac_value = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<8}")
            .parse::<i64>()
            .map_err(|_| format!("invalid amount '{value}'"))?
    };
    whole
        .checked_mul(COIN)
        .and_then(|whole| whole.checked_add(frac_value))
        .ok_or_else(|| format!("amount out of range '{value}'"))
}
