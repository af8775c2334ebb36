//! Named scenario persistence.
//!
//! Scenarios are kept as a JSON object keyed by name. Older files tagged
//! events as "Inflow"/"Outflow" style strings; those are relabeled to the
//! Credit/Debit vocabulary on load so the engine only ever sees current tags.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{info, warn};

use crate::core::Scenario;
use crate::error::{ProjectionError, Result};

pub const MAX_SCENARIOS: usize = 5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioStore {
    scenarios: BTreeMap<String, Scenario>,
}

impl ScenarioStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a store from `path`. A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let text = fs::read_to_string(path)?;
        let store = Self::from_json(&text)?;
        info!(path = %path.display(), scenarios = store.len(), "loaded scenarios");
        Ok(store)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let raw: BTreeMap<String, Value> = serde_json::from_str(text)?;
        let mut scenarios = BTreeMap::new();
        for (name, mut value) in raw {
            relabel_legacy_event_types(&mut value);
            let scenario: Scenario = serde_json::from_value(value)
                .map_err(|e| ProjectionError::Store(format!("scenario '{name}': {e}")))?;
            for event in &scenario.liquidity_events {
                event.validate()?;
            }
            scenarios.insert(name, scenario);
        }
        Ok(Self { scenarios })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_json()?)?;
        info!(path = %path.display(), scenarios = self.len(), "saved scenarios");
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.scenarios)?)
    }

    /// Adds or replaces a scenario under its own name. A new name is refused
    /// once `MAX_SCENARIOS` are held.
    pub fn insert(&mut self, scenario: Scenario) -> Result<()> {
        scenario.validate()?;
        for event in &scenario.liquidity_events {
            event.validate()?;
        }
        if !self.scenarios.contains_key(&scenario.name) && self.scenarios.len() >= MAX_SCENARIOS {
            warn!(scenario = %scenario.name, "scenario limit reached");
            return Err(ProjectionError::Store(format!(
                "at most {MAX_SCENARIOS} scenarios can be saved; delete one first"
            )));
        }
        self.scenarios.insert(scenario.name.clone(), scenario);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Scenario> {
        self.scenarios.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scenarios.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

fn relabel_legacy_event_types(scenario: &mut Value) {
    let Some(events) = scenario
        .get_mut("liquidity_events")
        .and_then(Value::as_array_mut)
    else {
        return;
    };

    for event in events {
        let Some(tag) = event.get("type").and_then(Value::as_str) else {
            continue;
        };
        let lower = tag.to_lowercase();
        let relabeled = if lower.contains("inflow") {
            "Credit"
        } else if lower.contains("outflow") {
            "Debit"
        } else {
            continue;
        };
        event["type"] = Value::String(relabeled.to_string());
    }
}
