use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounterVec, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    webhooks_received_total: IntCounterVec,
    events_dropped_total: IntCounterVec,
    notifications_total: IntCounterVec,
    actions_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let webhooks_received_total = IntCounterVec::new(
            prometheus::Opts::new(
                "pagerduty_relay_webhooks_received_total",
                "Webhook deliveries accepted for processing, by payload shape.",
            ),
            &["shape"],
        )
        .context("create webhooks_received_total metric")?;

        let events_dropped_total = IntCounterVec::new(
            prometheus::Opts::new(
                "pagerduty_relay_events_dropped_total",
                "Webhook deliveries or events discarded before correlation.",
            ),
            &["reason"],
        )
        .context("create events_dropped_total metric")?;

        let notifications_total = IntCounterVec::new(
            prometheus::Opts::new(
                "pagerduty_relay_notifications_total",
                "Correlator outcomes for incident events.",
            ),
            &["outcome"],
        )
        .context("create notifications_total metric")?;

        let actions_total = IntCounterVec::new(
            prometheus::Opts::new(
                "pagerduty_relay_actions_total",
                "Chat-initiated incident actions, by action and result.",
            ),
            &["action", "result"],
        )
        .context("create actions_total metric")?;

        registry
            .register(Box::new(webhooks_received_total.clone()))
            .context("register webhooks_received_total")?;
        registry
            .register(Box::new(events_dropped_total.clone()))
            .context("register events_dropped_total")?;
        registry
            .register(Box::new(notifications_total.clone()))
            .context("register notifications_total")?;
        registry
            .register(Box::new(actions_total.clone()))
            .context("register actions_total")?;

        Ok(Self {
            registry,
            webhooks_received_total,
            events_dropped_total,
            notifications_total,
            actions_total,
        })
    }

    pub fn inc_received(&self, shape: &str) {
        self.webhooks_received_total
            .with_label_values(&[shape])
            .inc();
    }

    pub fn inc_dropped(&self, reason: &str) {
        self.events_dropped_total.with_label_values(&[reason]).inc();
    }

    pub fn inc_notification(&self, outcome: &str) {
        self.notifications_total.with_label_values(&[outcome]).inc();
    }

    pub fn inc_action(&self, action: &str, result: &str) {
        self.actions_total
            .with_label_values(&[action, result])
            .inc();
    }

    pub fn render(&self) -> Result<String> {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("encode metrics")?;
        String::from_utf8(buffer).context("metrics text is valid utf-8")
    }
}
