use alloy_primitives::{Address, B256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 策略在链上的唯一标识
pub type StrategyId = U256;

/// 撮合引擎的输入单元：策略ID -> 压缩订单
pub type OrdersMap = BTreeMap<StrategyId, EncodedOrder>;

/// 压缩订单，与链上存储的四个整数字段一一对应
///
/// `y` 为当前可卖出数量，`z` 为曲线容量常数，`a`/`b` 为压缩浮点编码的
/// 平方根价格区间（`b` 为下界，`a + b` 为上界）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EncodedOrder {
    #[serde(with = "u128_string")]
    pub y: u128,
    #[serde(with = "u128_string")]
    pub z: u128,
    #[serde(rename = "A", with = "u64_string")]
    pub a: u64,
    #[serde(rename = "B", with = "u64_string")]
    pub b: u64,
}

/// 人类可读的订单：容量与最低/最高/边际价格
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedOrder {
    pub liquidity: Decimal,
    pub lowest_rate: Decimal,
    pub highest_rate: Decimal,
    pub marginal_rate: Decimal,
}

/// 无序交易对，内部总是按地址升序存储
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenPair {
    pub token0: Address,
    pub token1: Address,
}

impl TokenPair {
    pub fn new(a: Address, b: Address) -> Self {
        if a <= b {
            Self { token0: a, token1: b }
        } else {
            Self { token0: b, token1: a }
        }
    }

    pub fn contains(&self, token: Address) -> bool {
        self.token0 == token || self.token1 == token
    }
}

impl std::fmt::Display for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.token0, self.token1)
    }
}

/// 链上策略：`order0` 卖出 `token0`，`order1` 卖出 `token1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedStrategy {
    pub id: StrategyId,
    pub token0: Address,
    pub token1: Address,
    pub order0: EncodedOrder,
    pub order1: EncodedOrder,
}

impl EncodedStrategy {
    pub fn pair(&self) -> TokenPair {
        TokenPair::new(self.token0, self.token1)
    }

    /// Returns the order that sells `token`, if the strategy trades it.
    pub fn order_selling(&self, token: Address) -> Option<&EncodedOrder> {
        if token == self.token0 {
            Some(&self.order0)
        } else if token == self.token1 {
            Some(&self.order1)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedStrategy {
    pub id: StrategyId,
    pub token0: Address,
    pub token1: Address,
    pub order0: DecodedOrder,
    pub order1: DecodedOrder,
}

/// 单个订单在一次撮合中的贡献
///
/// `input` 以请求金额的单位计（按源金额撮合时为源代币，按目标金额撮合时为目标代币），
/// `output` 为对应的另一侧数量。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchAction {
    pub id: StrategyId,
    #[serde(with = "u128_string")]
    pub input: u128,
    #[serde(with = "u128_string")]
    pub output: u128,
}

/// 区块号与区块哈希，用于重组检测
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub number: u64,
    pub hash: B256,
}

/// 一次成交的链上记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trader: Address,
    pub source_token: Address,
    pub target_token: Address,
    #[serde(with = "u128_string")]
    pub source_amount: u128,
    #[serde(with = "u128_string")]
    pub target_amount: u128,
    #[serde(with = "u128_string")]
    pub trading_fee_amount: u128,
    pub by_target_amount: bool,
}

impl TradeRecord {
    pub fn pair(&self) -> TokenPair {
        TokenPair::new(self.source_token, self.target_token)
    }
}

/// 链上状态变更事件的负载
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventData {
    StrategyCreated(EncodedStrategy),
    StrategyUpdated(EncodedStrategy),
    StrategyDeleted(EncodedStrategy),
    TradingFeePpmUpdated { new_fee_ppm: u32 },
    PairTradingFeePpmUpdated { pair: TokenPair, new_fee_ppm: u32 },
    TokensTraded(TradeRecord),
}

impl EventData {
    /// Short label used for logging and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EventData::StrategyCreated(_) => "strategy_created",
            EventData::StrategyUpdated(_) => "strategy_updated",
            EventData::StrategyDeleted(_) => "strategy_deleted",
            EventData::TradingFeePpmUpdated { .. } => "trading_fee_updated",
            EventData::PairTradingFeePpmUpdated { .. } => "pair_trading_fee_updated",
            EventData::TokensTraded(_) => "tokens_traded",
        }
    }
}

/// 带排序键 `(block_number, log_index)` 的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub block_number: u64,
    pub log_index: u64,
    pub data: EventData,
}

impl SyncEvent {
    pub fn sort_key(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// 批量拉取时某个交易对的全部策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairStrategies {
    pub pair: TokenPair,
    pub strategies: Vec<EncodedStrategy>,
}

/// 大整数以十进制字符串序列化，避免 JSON 数值精度丢失
pub mod u128_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

pub mod u64_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}
