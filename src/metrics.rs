// Prometheus metrics definitions for the XP bot.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Gateway bridges currently connected over the websocket.
    pub static ref GATEWAY_CONNECTIONS: IntGauge =
        IntGauge::new("xpbot_gateway_connections", "Connected gateway bridges").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Guild messages received from non-bot authors.
    pub static ref MESSAGES_SEEN_TOTAL: IntCounter = IntCounter::new(
        "xpbot_messages_seen_total",
        "Guild messages received from non-bot authors",
    )
    .unwrap();

    /// Messages that earned XP.
    pub static ref XP_ACCRUALS_TOTAL: IntCounter = IntCounter::new(
        "xpbot_xp_accruals_total",
        "Messages that earned XP",
    )
    .unwrap();

    /// Messages ignored because of the cooldown window.
    pub static ref COOLDOWN_REJECTIONS_TOTAL: IntCounter = IntCounter::new(
        "xpbot_cooldown_rejections_total",
        "Messages ignored by the cooldown",
    )
    .unwrap();

    /// Level-ups from accruals and grants.
    pub static ref LEVEL_UPS_TOTAL: IntCounter = IntCounter::new(
        "xpbot_level_ups_total",
        "Level-ups from accruals and grants",
    )
    .unwrap();

    /// Slash command invocations, by command and outcome (ok / error kind).
    pub static ref COMMANDS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("xpbot_commands_total", "Slash command invocations"),
        &["command", "outcome"],
    )
    .unwrap();

    /// Storage failures surfaced to handlers.
    pub static ref STORE_ERRORS_TOTAL: IntCounter = IntCounter::new(
        "xpbot_store_errors_total",
        "Storage failures surfaced to handlers",
    )
    .unwrap();

    /// Command registry syncs, by result (ok / hard_resync / failed).
    pub static ref COMMAND_SYNCS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("xpbot_command_syncs_total", "Command registry syncs"),
        &["result"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup;
/// repeated calls are ignored.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(GATEWAY_CONNECTIONS.clone()),
        Box::new(MESSAGES_SEEN_TOTAL.clone()),
        Box::new(XP_ACCRUALS_TOTAL.clone()),
        Box::new(COOLDOWN_REJECTIONS_TOTAL.clone()),
        Box::new(LEVEL_UPS_TOTAL.clone()),
        Box::new(COMMANDS_TOTAL.clone()),
        Box::new(STORE_ERRORS_TOTAL.clone()),
        Box::new(COMMAND_SYNCS_TOTAL.clone()),
    ];

    for c in collectors {
        if let Err(e) = REGISTRY.register(c) {
            tracing::debug!("Metric already registered: {e}");
        }
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_metrics_after_register() {
        register_metrics();
        // Second registration must not panic
        register_metrics();
        XP_ACCRUALS_TOTAL.inc();
        let output = gather_metrics();
        assert!(output.contains("xpbot_xp_accruals_total"));
    }

    #[test]
    fn test_metric_increments() {
        GATEWAY_CONNECTIONS.inc();
        GATEWAY_CONNECTIONS.dec();

        let before = COMMANDS_TOTAL.with_label_values(&["rank", "ok"]).get();
        COMMANDS_TOTAL.with_label_values(&["rank", "ok"]).inc();
        assert_eq!(
            COMMANDS_TOTAL.with_label_values(&["rank", "ok"]).get(),
            before + 1
        );

        COMMAND_SYNCS_TOTAL.with_label_values(&["hard_resync"]).inc();
        STORE_ERRORS_TOTAL.inc();
        LEVEL_UPS_TOTAL.inc();
    }
}
