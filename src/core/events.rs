use super::types::{EventKind, LiquidityEvent, Recurrence, Scenario};
use crate::error::{ProjectionError, Result};

/// Net effect of all active liquidity events at one age.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidityAtAge<'a> {
    pub net: f64,
    pub labels: Vec<&'a str>,
    pub taxes: f64,
}

/// Sums the annualized amounts of every enabled event that applies at `age`,
/// along with the tax owed on taxable inflows.
pub fn apply_liquidity_events(age: u32, events: &[LiquidityEvent]) -> LiquidityAtAge<'_> {
    let mut net = 0.0;
    let mut labels = Vec::new();
    let mut taxes = 0.0;

    for event in events {
        if !event.enabled || age < event.start_age || age > event.end_age {
            continue;
        }

        let amount = match event.recurrence {
            Recurrence::OneTime if age != event.start_age => continue,
            Recurrence::OneTime | Recurrence::Annual => event.amount,
            Recurrence::Monthly => event.amount * 12.0,
        };

        net += amount;
        labels.push(event.label.as_str());
        if event.taxable && amount > 0.0 {
            taxes += amount * event.tax_rate / 100.0;
        }
    }

    LiquidityAtAge { net, labels, taxes }
}

/// Per-age `(net, taxes)` for the scenario's horizon, indexed from
/// `current_age`. Events are immutable during a run, so both simulators share
/// one schedule instead of re-scanning the list on every trial.
pub(crate) fn liquidity_schedule(scenario: &Scenario, events: &[LiquidityEvent]) -> Vec<(f64, f64)> {
    scenario
        .ages()
        .map(|age| {
            let at_age = apply_liquidity_events(age, events);
            (at_age.net, at_age.taxes)
        })
        .collect()
}

impl LiquidityEvent {
    /// Boundary check applied before events are stored or handed to the
    /// engine.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: &str| {
            Err(ProjectionError::InvalidEvent {
                label: self.label.clone(),
                reason: reason.to_string(),
            })
        };

        if self.label.trim().is_empty() {
            return fail("label must not be empty");
        }
        if self.start_age > self.end_age {
            return fail("start_age must be <= end_age");
        }
        if self.recurrence == Recurrence::OneTime && self.start_age != self.end_age {
            return fail("one-time events must start and end at the same age");
        }
        if !self.amount.is_finite() {
            return fail("amount must be finite");
        }
        match self.kind {
            EventKind::Credit if self.amount < 0.0 => return fail("credits must be >= 0"),
            EventKind::Debit if self.amount > 0.0 => return fail("debits must be <= 0"),
            _ => {}
        }
        if !(0.0..=100.0).contains(&self.tax_rate) {
            return fail("tax_rate must be between 0 and 100");
        }
        Ok(())
    }
}

/// Starter event list offered to new scenarios: a house sale at 66.
pub fn default_events() -> Vec<LiquidityEvent> {
    vec![LiquidityEvent {
        kind: EventKind::Credit,
        label: "Sell House".to_string(),
        start_age: 66,
        end_age: 66,
        amount: 250_000.0,
        recurrence: Recurrence::OneTime,
        enabled: true,
        taxable: false,
        tax_rate: 0.0,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert_eq, proptest};

    fn event(
        kind: EventKind,
        start_age: u32,
        end_age: u32,
        amount: f64,
        recurrence: Recurrence,
    ) -> LiquidityEvent {
        LiquidityEvent {
            kind,
            label: "event".to_string(),
            start_age,
            end_age,
            amount,
            recurrence,
            enabled: true,
            taxable: false,
            tax_rate: 0.0,
        }
    }

    #[test]
    fn one_time_event_applies_only_at_start_age() {
        let events = vec![event(EventKind::Credit, 50, 50, 10_000.0, Recurrence::OneTime)];
        assert_eq!(apply_liquidity_events(49, &events).net, 0.0);
        let at = apply_liquidity_events(50, &events);
        assert_eq!(at.net, 10_000.0);
        assert_eq!(at.labels, vec!["event"]);
        assert_eq!(apply_liquidity_events(51, &events).net, 0.0);
    }

    #[test]
    fn one_time_event_with_wider_range_still_fires_once() {
        let events = vec![event(EventKind::Credit, 50, 55, 1_000.0, Recurrence::OneTime)];
        let total: f64 = (45..60)
            .map(|age| apply_liquidity_events(age, &events).net)
            .sum();
        assert_eq!(total, 1_000.0);
    }

    #[test]
    fn monthly_event_is_annualized() {
        let events = vec![event(EventKind::Debit, 40, 42, -200.0, Recurrence::Monthly)];
        for age in 40..=42 {
            assert_eq!(apply_liquidity_events(age, &events).net, -2_400.0);
        }
        assert_eq!(apply_liquidity_events(43, &events).net, 0.0);
        assert!(apply_liquidity_events(39, &events).labels.is_empty());
    }

    #[test]
    fn tax_applies_to_positive_taxable_amounts_only() {
        let mut credit = event(EventKind::Credit, 60, 62, 1_000.0, Recurrence::Monthly);
        credit.taxable = true;
        credit.tax_rate = 25.0;
        let mut debit = event(EventKind::Debit, 60, 62, -5_000.0, Recurrence::Annual);
        debit.taxable = true;
        debit.tax_rate = 25.0;

        let both = [credit, debit];
        let at = apply_liquidity_events(61, &both);
        assert_eq!(at.net, 12_000.0 - 5_000.0);
        assert_eq!(at.taxes, 3_000.0);
    }

    #[test]
    fn aggregator_trusts_stored_sign() {
        // A credit persisted with the wrong sign still counts as an outflow.
        let events = vec![event(EventKind::Credit, 30, 30, -100.0, Recurrence::OneTime)];
        assert_eq!(apply_liquidity_events(30, &events).net, -100.0);
    }

    #[test]
    fn validate_rejects_sign_mismatch_and_bad_ranges() {
        assert!(event(EventKind::Credit, 30, 30, -1.0, Recurrence::OneTime)
            .validate()
            .is_err());
        assert!(event(EventKind::Debit, 30, 30, 1.0, Recurrence::OneTime)
            .validate()
            .is_err());
        assert!(event(EventKind::Credit, 30, 31, 1.0, Recurrence::OneTime)
            .validate()
            .is_err());
        assert!(event(EventKind::Credit, 32, 31, 1.0, Recurrence::Annual)
            .validate()
            .is_err());
        let mut unlabeled = event(EventKind::Credit, 30, 30, 1.0, Recurrence::OneTime);
        unlabeled.label = "  ".to_string();
        assert!(unlabeled.validate().is_err());
        assert!(default_events().iter().all(|e| e.validate().is_ok()));
    }

    proptest! {
        #[test]
        fn disabled_events_never_contribute(
            start in 20_u32..80,
            span in 0_u32..20,
            amount in -1.0e6_f64..1.0e6,
            age in 15_u32..110,
        ) {
            let mut e = event(EventKind::Credit, start, start + span, amount, Recurrence::Annual);
            e.taxable = true;
            e.tax_rate = 30.0;
            e.enabled = false;
            let events = [e];
            let at = apply_liquidity_events(age, &events);
            prop_assert_eq!(at.net, 0.0);
            prop_assert_eq!(at.taxes, 0.0);
            prop_assert_eq!(at.labels.len(), 0);
        }
    }
}
