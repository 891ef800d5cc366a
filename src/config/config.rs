use anyhow::{bail, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "SWAPSTAT_CONFIG";

/// PostgreSQL database connection configuration.
///
/// Holds the block and swap event ledger written by the observer.
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    16
}

/// Chain access and contract addresses.
#[derive(Debug, Deserialize, Clone)]
pub struct ChainSettings {
    pub rpc_url: String,
    /// Pair factory used to enumerate the pair universe. Empty disables
    /// enumeration and only the certified pairs are watched.
    #[serde(default)]
    pub factory_address: String,
    /// Height to start from when the ledger is empty (0 = head + 1).
    #[serde(default)]
    pub start_height: u64,
    pub confirmations: u64,
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval_milliseconds: u64,
    /// How often the factory is re-enumerated for new pairs.
    #[serde(default = "default_universe_refresh_interval")]
    pub universe_refresh_interval_secs: u64,
    /// Trusted pairs seeding the symbol -> address map.
    #[serde(default)]
    pub certified_pairs: Vec<String>,
    /// Staking pools whose governance token balance counts as staking TVL.
    #[serde(default)]
    pub syrup_pools: Vec<String>,
    pub governance_token_address: String,
    #[serde(default = "default_governance_token_symbol")]
    pub governance_token_symbol: String,
    /// Display name of the first syrup pool.
    #[serde(default = "default_primary_pool_name")]
    pub primary_pool_name: String,
}

fn default_fetch_interval() -> u64 {
    1_000
}

fn default_universe_refresh_interval() -> u64 {
    1_000
}

fn default_governance_token_symbol() -> String {
    "Cake".to_string()
}

fn default_primary_pool_name() -> String {
    "Cake".to_string()
}

/// Observer retention and housekeeping intervals.
#[derive(Debug, Deserialize, Clone)]
pub struct ObserverSettings {
    #[serde(default = "default_block_retention")]
    pub block_retention: u64,
    #[serde(default = "default_tx_retention")]
    pub tx_retention: u64,
    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,
    #[serde(default = "default_alert_interval")]
    pub alert_interval_secs: u64,
    /// Upper bound for a single RPC call or store round trip.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
}

impl Default for ObserverSettings {
    fn default() -> Self {
        Self {
            block_retention: default_block_retention(),
            tx_retention: default_tx_retention(),
            prune_interval_secs: default_prune_interval(),
            alert_interval_secs: default_alert_interval(),
            rpc_timeout_secs: default_rpc_timeout(),
        }
    }
}

fn default_block_retention() -> u64 {
    10_000
}

fn default_tx_retention() -> u64 {
    100_000
}

fn default_prune_interval() -> u64 {
    30
}

fn default_alert_interval() -> u64 {
    100
}

fn default_rpc_timeout() -> u64 {
    5
}

/// Price and volume aggregation configuration.
///
/// Token sets are keyed by symbol. `base_tokens` is ordered: propagation
/// runs from each base token in turn, then from `anchor_token`.
#[derive(Debug, Deserialize, Clone)]
pub struct AggregatorSettings {
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_pair_refresh_interval")]
    pub pair_refresh_interval_secs: u64,
    /// Minimum fiat volume for a pair or a propagation edge to count.
    #[serde(default = "default_qualified_volume")]
    pub qualified_volume: f64,
    /// Pairs whose reserve0 * reserve1 is below this are dust and ignored.
    #[serde(default = "default_min_liquidity")]
    pub min_liquidity: f64,
    #[serde(default = "default_stable_tokens")]
    pub stable_tokens: Vec<String>,
    #[serde(default = "default_base_tokens")]
    pub base_tokens: Vec<String>,
    /// Base token priced directly from its pair against `stable_anchor`.
    #[serde(default = "default_reference_token")]
    pub reference_token: String,
    #[serde(default = "default_stable_anchor")]
    pub stable_anchor: String,
    /// High-liquidity token used as the second propagation generation.
    #[serde(default = "default_anchor_token")]
    pub anchor_token: String,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            pair_refresh_interval_secs: default_pair_refresh_interval(),
            qualified_volume: default_qualified_volume(),
            min_liquidity: default_min_liquidity(),
            stable_tokens: default_stable_tokens(),
            base_tokens: default_base_tokens(),
            reference_token: default_reference_token(),
            stable_anchor: default_stable_anchor(),
            anchor_token: default_anchor_token(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_pair_refresh_interval() -> u64 {
    1_000
}

fn default_qualified_volume() -> f64 {
    100.0
}

fn default_min_liquidity() -> f64 {
    100.0
}

fn default_stable_tokens() -> Vec<String> {
    vec!["BUSD".to_string()]
}

fn default_base_tokens() -> Vec<String> {
    vec!["WBNB".to_string(), "BUSD".to_string()]
}

fn default_reference_token() -> String {
    "WBNB".to_string()
}

fn default_stable_anchor() -> String {
    "BUSD".to_string()
}

fn default_anchor_token() -> String {
    "Cake".to_string()
}

/// Staleness alert delivery.
///
/// Without a bot id and chat id alerts are only written to the log.
#[derive(Debug, Deserialize, Clone)]
pub struct AlertSettings {
    #[serde(default)]
    pub telegram_bot_id: String,
    #[serde(default)]
    pub telegram_chat_id: String,
    /// Seconds without a newly ingested block before alerting.
    pub block_update_timeout_secs: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Root application configuration.
///
/// Loaded from `config.yaml` (or the file named by `SWAPSTAT_CONFIG`) at
/// startup, with `SWAPSTAT__SECTION__KEY` environment overrides on top.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub postgres: PostgresSettings,
    pub chain: ChainSettings,
    #[serde(default)]
    pub observer: ObserverSettings,
    #[serde(default)]
    pub aggregator: AggregatorSettings,
    pub alert: AlertSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub log: LogSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config".to_string());

        let s = Config::builder()
            .add_source(File::with_name(&path))
            .add_source(
                Environment::with_prefix("SWAPSTAT")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("chain.certified_pairs")
                    .with_list_parse_key("chain.syrup_pools")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }

    /// Rejects configurations the loops cannot run with. Called once before
    /// anything is spawned; an error here ends the process.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.chain.rpc_url.is_empty(), "chain.rpc_url should not be empty");
        ensure!(
            self.chain.confirmations > 0,
            "chain.confirmations should be larger than 0"
        );
        ensure!(
            !self.chain.governance_token_address.is_empty(),
            "chain.governance_token_address should not be empty"
        );
        ensure!(
            self.alert.block_update_timeout_secs > 0,
            "alert.block_update_timeout_secs should be larger than 0"
        );

        // Fork repair only ever deletes pending events, so the retained
        // window has to outlive the confirmation depth.
        ensure!(
            self.observer.block_retention > self.chain.confirmations
                && self.observer.tx_retention > self.chain.confirmations,
            "observer retention windows must exceed chain.confirmations ({})",
            self.chain.confirmations
        );
        ensure!(
            self.chain.universe_refresh_interval_secs > 0,
            "chain.universe_refresh_interval_secs should be larger than 0"
        );
        ensure!(
            self.observer.rpc_timeout_secs > 0,
            "observer.rpc_timeout_secs should be larger than 0"
        );

        let agg = &self.aggregator;
        if agg.base_tokens.is_empty() {
            bail!("aggregator.base_tokens should not be empty");
        }
        ensure!(
            agg.base_tokens.contains(&agg.reference_token),
            "aggregator.reference_token {} is not one of the base tokens",
            agg.reference_token
        );
        ensure!(
            agg.stable_tokens.contains(&agg.stable_anchor),
            "aggregator.stable_anchor {} is not one of the stable tokens",
            agg.stable_anchor
        );
        ensure!(
            agg.qualified_volume >= 0.0 && agg.min_liquidity >= 0.0,
            "aggregator thresholds must not be negative"
        );
        ensure!(
            agg.refresh_interval_secs > 0 && agg.pair_refresh_interval_secs > 0,
            "aggregator intervals should be larger than 0"
        );

        for addr in self.chain.certified_pairs.iter().chain(&self.chain.syrup_pools) {
            ensure!(is_hex_address(addr), "invalid contract address {}", addr);
        }
        ensure!(
            is_hex_address(&self.chain.governance_token_address),
            "invalid governance token address {}",
            self.chain.governance_token_address
        );
        if !self.chain.factory_address.is_empty() {
            ensure!(
                is_hex_address(&self.chain.factory_address),
                "invalid factory address {}",
                self.chain.factory_address
            );
        }

        ensure!(
            self.server.listen_addr.parse::<std::net::SocketAddr>().is_ok(),
            "server.listen_addr {} is not a socket address",
            self.server.listen_addr
        );
        ensure!(
            self.log.level.parse::<log::LevelFilter>().is_ok(),
            "log.level {} is not a log level",
            self.log.level
        );

        Ok(())
    }
}

fn is_hex_address(s: &str) -> bool {
    s.len() == 42
        && s.starts_with("0x")
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}
