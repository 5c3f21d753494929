use prometheus::{IntCounter, Registry};

/// Call tracker metrics collector
#[derive(Clone)]
pub struct TrackerMetrics {
    /// Total tracks created
    tracks_created: IntCounter,

    /// Applied progress updates
    updates: IntCounter,

    /// Tracks that reached Fulfilled
    fulfilled: IntCounter,

    /// Tracks that reached Rejected
    rejected: IntCounter,

    /// Transitions discarded because the track was already settled
    ignored_transitions: IntCounter,

    registry: Registry,
}

impl TrackerMetrics {
    /// Create new metrics collector with names under `prefix`
    pub fn new(prefix: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tracks_created = IntCounter::new(
            format!("{prefix}_tracks_created_total"),
            "Total number of tracked calls started",
        )?;
        registry.register(Box::new(tracks_created.clone()))?;

        let updates = IntCounter::new(
            format!("{prefix}_updates_total"),
            "Total number of progress updates applied",
        )?;
        registry.register(Box::new(updates.clone()))?;

        let fulfilled = IntCounter::new(
            format!("{prefix}_fulfilled_total"),
            "Total number of tracked calls fulfilled",
        )?;
        registry.register(Box::new(fulfilled.clone()))?;

        let rejected = IntCounter::new(
            format!("{prefix}_rejected_total"),
            "Total number of tracked calls rejected",
        )?;
        registry.register(Box::new(rejected.clone()))?;

        let ignored_transitions = IntCounter::new(
            format!("{prefix}_ignored_transitions_total"),
            "Transitions discarded on already settled calls",
        )?;
        registry.register(Box::new(ignored_transitions.clone()))?;

        Ok(Self {
            tracks_created,
            updates,
            fulfilled,
            rejected,
            ignored_transitions,
            registry,
        })
    }

    pub fn track_created(&self) {
        self.tracks_created.inc();
    }

    pub fn track_updated(&self) {
        self.updates.inc();
    }

    pub fn track_fulfilled(&self) {
        self.fulfilled.inc();
    }

    pub fn track_rejected(&self) {
        self.rejected.inc();
    }

    pub fn transition_ignored(&self) {
        self.ignored_transitions.inc();
    }

    /// Get metrics registry for scraping
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get metrics as JSON (name and current value of each counter)
    pub fn metrics_json(&self) -> serde_json::Value {
        let metrics: Vec<_> = self
            .registry
            .gather()
            .into_iter()
            .map(|family| {
                let value: f64 = family
                    .get_metric()
                    .iter()
                    .map(|m| m.get_counter().get_value())
                    .sum();
                serde_json::json!({
                    "name": family.get_name(),
                    "help": family.get_help(),
                    "value": value,
                })
            })
            .collect();

        serde_json::json!({ "metrics": metrics })
    }
}
