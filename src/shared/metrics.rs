//! Prometheus Metrics Module
//!
//! 订单缓存同步与撮合的核心指标
//!
//! ## 指标类型
//! - **Counter**: 已应用事件数、重组次数、同步错误数
//! - **Histogram**: 撮合耗时
//! - **Gauge**: 已缓存交易对数量、最新同步区块
//!
//! ## 使用示例
//! ```rust,ignore
//! use curve_engine::shared::metrics::METRICS;
//!
//! METRICS.reorgs_total.inc();
//!
//! let timer = METRICS.match_duration.with_label_values(&["fast"]).start_timer();
//! // ... 执行撮合 ...
//! timer.observe_duration();
//! ```

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, register_int_counter,
    CounterVec, Encoder, Gauge, HistogramVec, IntCounter, TextEncoder,
};

lazy_static! {
    /// 全局Metrics实例
    pub static ref METRICS: Metrics = Metrics::new();
}

pub struct Metrics {
    /// 已应用事件数 (按事件类型)
    pub events_applied_total: CounterVec,

    /// 检测到的链重组次数
    pub reorgs_total: IntCounter,

    /// 同步错误数 (按阶段: bootstrap/events/pairs/fees)
    pub sync_errors_total: CounterVec,

    /// 已缓存的交易对数量
    pub cached_pairs: Gauge,

    /// 缓存水位线对应的区块号
    pub latest_synced_block: Gauge,

    /// 撮合耗时分布 (秒, 按策略: fast/best)
    pub match_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_applied_total: register_counter_vec!(
                "curve_engine_events_applied_total",
                "Total number of ledger events applied to the order cache",
                &["kind"]
            )
            .unwrap(),

            reorgs_total: register_int_counter!(
                "curve_engine_reorgs_total",
                "Total number of detected chain reorganizations"
            )
            .unwrap(),

            sync_errors_total: register_counter_vec!(
                "curve_engine_sync_errors_total",
                "Total number of transient sync failures",
                &["stage"]
            )
            .unwrap(),

            cached_pairs: register_gauge!(
                "curve_engine_cached_pairs",
                "Number of token pairs held in the order cache"
            )
            .unwrap(),

            latest_synced_block: register_gauge!(
                "curve_engine_latest_synced_block",
                "Block number of the order cache watermark"
            )
            .unwrap(),

            match_duration: register_histogram_vec!(
                "curve_engine_match_duration_seconds",
                "Order matching duration in seconds",
                &["policy"],
                vec![0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05]
            )
            .unwrap(),
        }
    }

    /// 导出Prometheus格式的指标
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = vec![];
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_exported() {
        METRICS.events_applied_total.with_label_values(&["strategy_created"]).inc();
        let output = METRICS.export();
        assert!(output.contains("curve_engine_events_applied_total"));
    }

    #[test]
    fn test_histogram_exported() {
        METRICS.match_duration.with_label_values(&["fast"]).observe(0.000_2);
        let output = METRICS.export();
        assert!(output.contains("curve_engine_match_duration_seconds"));
    }

    #[test]
    fn test_gauge_exported() {
        // 全局共享，不断言具体数值
        METRICS.cached_pairs.set(3.0);
        let output = METRICS.export();
        assert!(output.contains("curve_engine_cached_pairs"));
    }
}
