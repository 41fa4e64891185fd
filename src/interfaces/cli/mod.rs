/// CLI Interface Module
///
/// Command-line access to the order codec and the matching engine.
///
/// ## Commands
/// - `encode`: decimal order -> compressed order
/// - `decode`: compressed order -> decimal order
/// - `match`: split a trade across the orders listed in a JSON file
///
/// Results are printed to stdout as JSON.

use crate::domain::codec::{decode_order, encode_order, CodecError};
use crate::domain::matching::{default_filter, MatchConfig, MatchType, MatchingEngine, TradeBy};
use crate::domain::trade_math::{TradeFormula, TradeMath};
use crate::shared::protocol::{DecodedOrder, EncodedOrder, OrdersMap, StrategyId};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 曲线订单引擎命令行配置
#[derive(Parser, Debug, Clone)]
#[command(name = "curve-engine")]
#[command(version = "0.1.0")]
#[command(about = "曲线订单编解码与撮合工具", long_about = None)]
pub struct CliConfig {
    /// 日志级别
    #[arg(short = 'l', long, global = true, default_value = "info", value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// 将十进制订单编码为链上格式
    Encode {
        #[arg(long)]
        liquidity: Decimal,
        #[arg(long)]
        lowest: Decimal,
        #[arg(long)]
        highest: Decimal,
        #[arg(long)]
        marginal: Decimal,
    },

    /// 将链上订单解码为十进制表示
    Decode {
        #[arg(long)]
        y: u128,
        #[arg(long)]
        z: u128,
        #[arg(short = 'A', long = "a")]
        a: u64,
        #[arg(short = 'B', long = "b")]
        b: u64,
    },

    /// 在订单集合上撮合一笔交易
    Match {
        /// 订单文件：策略ID -> 压缩订单 的 JSON 对象
        #[arg(short, long)]
        orders: PathBuf,

        /// 交易数量（最小单位）
        #[arg(short, long)]
        amount: u128,

        /// 数量所属的一侧
        #[arg(long, default_value = "source", value_parser = ["source", "target"])]
        by: String,

        /// 撮合策略
        #[arg(short, long, default_value = "fast", value_parser = ["fast", "best"])]
        policy: String,

        /// 交易公式
        #[arg(short, long, default_value = "rescaled", value_parser = ["rescaled", "legacy"])]
        formula: String,

        /// 最优撮合参与的最大订单数
        #[arg(long, default_value_t = 16)]
        max_orders: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid strategy id: {0}")]
    StrategyId(String),

    #[error("unknown {kind}: {value}")]
    UnknownOption { kind: &'static str, value: String },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Runs the CLI application
///
/// Parses command-line arguments, executes the command and prints its output.
pub fn run() -> Result<(), CliError> {
    let config = CliConfig::parse();
    init_logging(&config.log_level);
    tracing::debug!("配置: {:?}", config);

    let output = execute(&config.command)?;
    println!("{output}");
    Ok(())
}

/// Executes a command and returns its JSON output.
pub fn execute(command: &Command) -> Result<String, CliError> {
    match command {
        Command::Encode { liquidity, lowest, highest, marginal } => {
            let order = DecodedOrder {
                liquidity: *liquidity,
                lowest_rate: *lowest,
                highest_rate: *highest,
                marginal_rate: *marginal,
            };
            Ok(serde_json::to_string_pretty(&encode_order(&order)?)?)
        }
        Command::Decode { y, z, a, b } => {
            let order = EncodedOrder { y: *y, z: *z, a: *a, b: *b };
            Ok(serde_json::to_string_pretty(&decode_order(&order)?)?)
        }
        Command::Match { orders, amount, by, policy, formula, max_orders } => {
            let orders = load_orders(orders)?;
            let config = MatchConfig { match_type: parse_match_type(policy)?, best_max_orders: *max_orders };
            let engine = MatchingEngine::new(config, TradeMath::new(parse_formula(formula)?));
            let by = parse_trade_by(by)?;

            tracing::info!(orders = orders.len(), amount, policy = %policy, "matching");
            let actions = engine.match_orders(*amount, &orders, by, &default_filter);
            Ok(serde_json::to_string_pretty(&actions)?)
        }
    }
}

/// Reads `{ "<strategy id>": { "y": .., "z": .., "A": .., "B": .. } }`.
fn load_orders(path: &Path) -> Result<OrdersMap, CliError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CliError::Io { path: path.to_path_buf(), source })?;
    let by_id: BTreeMap<String, EncodedOrder> = serde_json::from_str(&raw)?;
    by_id
        .into_iter()
        .map(|(id, order)| {
            StrategyId::from_str(&id)
                .map(|id| (id, order))
                .map_err(|_| CliError::StrategyId(id))
        })
        .collect()
}

fn parse_match_type(value: &str) -> Result<MatchType, CliError> {
    match value {
        "fast" => Ok(MatchType::Fast),
        "best" => Ok(MatchType::Best),
        _ => Err(CliError::UnknownOption { kind: "policy", value: value.to_string() }),
    }
}

fn parse_trade_by(value: &str) -> Result<TradeBy, CliError> {
    match value {
        "source" => Ok(TradeBy::Source),
        "target" => Ok(TradeBy::Target),
        _ => Err(CliError::UnknownOption { kind: "side", value: value.to_string() }),
    }
}

fn parse_formula(value: &str) -> Result<TradeFormula, CliError> {
    match value {
        "rescaled" => Ok(TradeFormula::Rescaled),
        "legacy" => Ok(TradeFormula::Legacy),
        _ => Err(CliError::UnknownOption { kind: "formula", value: value.to_string() }),
    }
}

/// 初始化日志系统
fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
