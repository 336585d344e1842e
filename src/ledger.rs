use crate::usage::{TokenUsageEvent, UsageSnapshot, event::ResolvedUsage};
use std::collections::HashMap;

/// Label used for the root row when no agent name or session ID is known for it.
pub const ROOT_LABEL: &str = "Root";
pub const TEAM_TOTAL_LABEL: &str = "Team Total";

/// Per-session usage state for one run of an agent team.
///
/// `sessions` holds the self usage of every reporting session. The root agent's own
/// share is never stored; it is derived from `root_inclusive` on demand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageLedger {
    sessions: HashMap<String, UsageSnapshot>,
    session_agents: HashMap<String, String>,
    root_inclusive: Option<UsageSnapshot>,
    root_session_id: Option<String>,
    root_agent_name: Option<String>,
    active_session_id: Option<String>,
}

/// One line of the per-agent breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakdownRow {
    pub label: String,
    pub usage: UsageSnapshot,
    pub is_active: bool,
}

/// Headline totals paired with the label they are shown under.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TeamTotals {
    pub label: Option<&'static str>,
    pub usage: UsageSnapshot,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one usage report into the ledger. Missing fields are skipped; nothing here
    /// can fail.
    pub fn record_event(&mut self, event: &TokenUsageEvent) {
        let ResolvedUsage {
            self_usage,
            inclusive_usage,
        } = event.resolve_usage();
        let session = event.session();
        let agent = event.agent_name();

        if let Some(agent) = agent {
            if self.root_agent_name.is_none() {
                tracing::info!(
                    agent,
                    session = session.unwrap_or_default(),
                    "root agent identified"
                );
                self.root_agent_name = Some(agent.to_string());
            }
        }

        if let Some(session) = session {
            self.active_session_id = Some(session.to_string());
            if let Some(snapshot) = self_usage.or(inclusive_usage) {
                self.sessions.insert(session.to_string(), snapshot);
            }
            if let Some(agent) = agent {
                self.session_agents
                    .insert(session.to_string(), agent.to_string());
            }
        }

        if agent.is_some() && agent == self.root_agent_name.as_deref() {
            if let Some(session) = session {
                self.confirm_root_session(session);
            }
            if let Some(inclusive) = inclusive_usage {
                self.root_inclusive = Some(inclusive);
            }
        }
    }

    fn confirm_root_session(&mut self, session: &str) {
        match self.root_session_id.as_deref() {
            None => self.root_session_id = Some(session.to_string()),
            Some(existing) if existing != session => {
                tracing::debug!(
                    root_session = existing,
                    session,
                    "root agent reported from another session; keeping original root session"
                );
            }
            Some(_) => {}
        }
    }

    /// Team-wide usage: the sum of every stored self snapshot, or the root's inclusive
    /// figure while no session has reported self usage yet. Never absent.
    pub fn compute_team_totals(&self) -> UsageSnapshot {
        if self.sessions.is_empty() {
            return self.root_inclusive.unwrap_or_default();
        }

        let mut totals = UsageSnapshot::default();
        for (_, usage) in self.sorted_sessions() {
            totals.accumulate(usage);
        }
        totals
    }

    /// The root agent's own usage: its inclusive figure minus the self usage of every
    /// other session. `None` until the root has reported an inclusive snapshot.
    pub fn compute_root_exclusive_usage(&self) -> Option<UsageSnapshot> {
        let mut exclusive = self.root_inclusive?;
        let root = self.root_session_id.as_deref();
        for (id, usage) in self.sorted_sessions() {
            if Some(id) == root {
                continue;
            }
            exclusive.debit(usage);
        }
        Some(exclusive)
    }

    pub fn render_totals(&self) -> TeamTotals {
        let label = self.has_usage().then_some(TEAM_TOTAL_LABEL);
        TeamTotals {
            label,
            usage: self.compute_team_totals(),
        }
    }

    /// Rows for the per-agent breakdown: the root first when known, then every other
    /// session in ascending session ID order.
    pub fn session_breakdown_rows(&self) -> Vec<BreakdownRow> {
        let mut rows = Vec::with_capacity(self.sessions.len() + 1);
        if let Some(root) = self.root_row() {
            rows.push(root);
        }

        let root = self.root_session_id.as_deref();
        let active = self.active_session_id.as_deref();
        for (id, usage) in self.sorted_sessions() {
            if Some(id) == root {
                continue;
            }
            let label = self
                .session_agents
                .get(id)
                .filter(|name| !name.is_empty())
                .cloned()
                .unwrap_or_else(|| id.to_string());
            rows.push(BreakdownRow {
                label,
                usage: *usage,
                is_active: Some(id) == active,
            });
        }
        rows
    }

    fn root_row(&self) -> Option<BreakdownRow> {
        let usage = self.compute_root_exclusive_usage().or_else(|| {
            self.root_session_id
                .as_deref()
                .and_then(|id| self.sessions.get(id))
                .copied()
        })?;

        let label = self
            .root_agent_name
            .clone()
            .or_else(|| self.root_session_id.clone())
            .unwrap_or_else(|| ROOT_LABEL.to_string());

        Some(BreakdownRow {
            label,
            usage,
            is_active: self.root_session_id.is_some()
                && self.root_session_id == self.active_session_id,
        })
    }

    fn sorted_sessions(&self) -> Vec<(&str, &UsageSnapshot)> {
        let mut sessions: Vec<(&str, &UsageSnapshot)> = self
            .sessions
            .iter()
            .map(|(id, usage)| (id.as_str(), usage))
            .collect();
        sessions.sort_unstable_by(|a, b| a.0.cmp(b.0));
        sessions
    }

    pub fn has_usage(&self) -> bool {
        !self.sessions.is_empty() || self.root_inclusive.is_some()
    }

    #[cfg(test)]
    pub fn session_usage(&self, session_id: &str) -> Option<UsageSnapshot> {
        self.sessions.get(session_id).copied()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[cfg(test)]
    pub fn root_inclusive(&self) -> Option<UsageSnapshot> {
        self.root_inclusive
    }

    pub fn root_agent_name(&self) -> Option<&str> {
        self.root_agent_name.as_deref()
    }

    #[cfg(test)]
    pub fn root_session_id(&self) -> Option<&str> {
        self.root_session_id.as_deref()
    }

    pub fn active_session_id(&self) -> Option<&str> {
        self.active_session_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::AgentContext;

    fn usage(input: u64, output: u64, cost: f64) -> UsageSnapshot {
        UsageSnapshot {
            input_tokens: input,
            output_tokens: output,
            cost,
            ..UsageSnapshot::default()
        }
    }

    fn event(session: Option<&str>, agent: Option<&str>) -> TokenUsageEvent {
        TokenUsageEvent {
            session_id: session.map(str::to_string),
            agent_context: AgentContext {
                agent_name: agent.map(str::to_string),
            },
            ..TokenUsageEvent::default()
        }
    }

    fn self_report(session: &str, agent: &str, self_usage: UsageSnapshot) -> TokenUsageEvent {
        TokenUsageEvent {
            self_usage: Some(self_usage),
            ..event(Some(session), Some(agent))
        }
    }

    fn assert_cost(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "cost {actual} != expected {expected}"
        );
    }

    #[test]
    fn single_root_event_fills_every_view() {
        let mut ledger = UsageLedger::new();
        let snapshot = usage(100, 50, 0.01);
        ledger.record_event(&TokenUsageEvent {
            self_usage: Some(snapshot),
            inclusive_usage: Some(snapshot),
            ..event(Some("s1"), Some("root"))
        });

        let totals = ledger.compute_team_totals();
        assert_eq!(totals.input_tokens, 100);
        assert_eq!(totals.output_tokens, 50);
        assert_cost(totals.cost, 0.01);

        let exclusive = ledger.compute_root_exclusive_usage().unwrap();
        assert_eq!(exclusive, snapshot);

        let rows = ledger.session_breakdown_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, "root");
        assert!(rows[0].is_active);
        assert_eq!(rows[0].usage, snapshot);
    }

    #[test]
    fn child_self_usage_is_debited_from_root_inclusive() {
        let mut ledger = UsageLedger::new();
        ledger.record_event(&TokenUsageEvent {
            inclusive_usage: Some(usage(1_000, 500, 1.00)),
            ..event(None, Some("root"))
        });
        ledger.record_event(&self_report("child1", "worker", usage(200, 100, 0.20)));

        let exclusive = ledger.compute_root_exclusive_usage().unwrap();
        assert_eq!(exclusive.input_tokens, 800);
        assert_eq!(exclusive.output_tokens, 400);
        assert_cost(exclusive.cost, 0.80);

        // Only the child has a self snapshot, so the headline total reflects it alone.
        let totals = ledger.compute_team_totals();
        assert_eq!(totals.input_tokens, 200);
        assert_eq!(totals.output_tokens, 100);
        assert_cost(totals.cost, 0.20);

        let rows = ledger.session_breakdown_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].label, "root");
        assert!(!rows[0].is_active);
        assert_eq!(rows[1].label, "worker");
        assert!(rows[1].is_active);
    }

    #[test]
    fn team_totals_fall_back_to_root_inclusive_only_when_no_self_usage() {
        let mut ledger = UsageLedger::new();
        ledger.record_event(&TokenUsageEvent {
            inclusive_usage: Some(usage(1_000, 500, 1.00)),
            ..event(None, Some("root"))
        });
        assert_eq!(ledger.compute_team_totals(), usage(1_000, 500, 1.00));

        ledger.record_event(&self_report("child1", "worker", usage(1, 1, 0.0)));
        assert_eq!(ledger.compute_team_totals().input_tokens, 1);
    }

    #[test]
    fn oversized_child_report_clamps_exclusive_to_zero() {
        let mut ledger = UsageLedger::new();
        ledger.record_event(&TokenUsageEvent {
            inclusive_usage: Some(usage(50, 0, 0.0)),
            ..event(None, Some("root"))
        });
        ledger.record_event(&self_report("child1", "worker", usage(80, 0, 0.5)));

        let exclusive = ledger.compute_root_exclusive_usage().unwrap();
        assert_eq!(exclusive.input_tokens, 0);
        assert_eq!(exclusive.cost, 0.0);
    }

    #[test]
    fn unnamed_session_is_labelled_by_its_id() {
        let mut ledger = UsageLedger::new();
        ledger.record_event(&TokenUsageEvent {
            self_usage: Some(usage(5, 5, 0.0)),
            ..event(Some("s2"), Some(""))
        });

        let rows = ledger.session_breakdown_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, "s2");
        assert!(rows[0].is_active);
        assert_eq!(ledger.root_agent_name(), None);
    }

    #[test]
    fn legacy_usage_populates_self_and_root_inclusive() {
        let mut ledger = UsageLedger::new();
        let legacy = usage(10, 5, 0.05);
        ledger.record_event(&TokenUsageEvent {
            usage: Some(legacy),
            ..event(Some("s1"), Some("root"))
        });

        assert_eq!(ledger.session_usage("s1"), Some(legacy));
        assert_eq!(ledger.root_inclusive(), Some(legacy));
        assert_eq!(ledger.root_session_id(), Some("s1"));
    }

    #[test]
    fn inclusive_usage_is_stored_when_self_usage_missing() {
        let mut ledger = UsageLedger::new();
        ledger.record_event(&TokenUsageEvent {
            inclusive_usage: Some(usage(7, 3, 0.1)),
            ..event(Some("s1"), None)
        });
        assert_eq!(ledger.session_usage("s1"), Some(usage(7, 3, 0.1)));
        // No root has been named, so no inclusive figure is attributed to one.
        assert_eq!(ledger.root_inclusive(), None);
        assert_eq!(ledger.compute_root_exclusive_usage(), None);
    }

    #[test]
    fn root_identity_is_sticky() {
        let mut ledger = UsageLedger::new();
        ledger.record_event(&TokenUsageEvent {
            inclusive_usage: Some(usage(10, 10, 0.0)),
            ..event(Some("root-session"), Some("planner"))
        });
        ledger.record_event(&TokenUsageEvent {
            inclusive_usage: Some(usage(99, 99, 0.0)),
            ..event(Some("other"), Some("coder"))
        });
        ledger.record_event(&TokenUsageEvent {
            inclusive_usage: Some(usage(20, 20, 0.0)),
            ..event(Some("elsewhere"), Some("planner"))
        });

        assert_eq!(ledger.root_agent_name(), Some("planner"));
        assert_eq!(ledger.root_session_id(), Some("root-session"));
        assert_eq!(ledger.active_session_id(), Some("elsewhere"));
        assert_eq!(ledger.root_inclusive(), Some(usage(20, 20, 0.0)));
    }

    #[test]
    fn event_without_session_updates_root_but_not_sessions() {
        let mut ledger = UsageLedger::new();
        ledger.record_event(&TokenUsageEvent {
            usage: Some(usage(4, 4, 0.04)),
            ..event(None, Some("root"))
        });

        assert_eq!(ledger.session_count(), 0);
        assert_eq!(ledger.active_session_id(), None);
        assert_eq!(ledger.root_inclusive(), Some(usage(4, 4, 0.04)));
        assert_eq!(ledger.root_session_id(), None);
    }

    #[test]
    fn team_totals_are_additive_with_max_context_limit() {
        let mut ledger = UsageLedger::new();
        let reports = [
            ("a", 100, 10, 500, 128_000, 0.5),
            ("b", 200, 20, 700, 200_000, 0.25),
            ("c", 300, 30, 900, 64_000, 0.125),
        ];
        for (id, input, output, context, limit, cost) in reports {
            ledger.record_event(&self_report(
                id,
                "agent",
                UsageSnapshot {
                    input_tokens: input,
                    output_tokens: output,
                    context_length: context,
                    context_limit: limit,
                    cost,
                },
            ));
        }

        let totals = ledger.compute_team_totals();
        assert_eq!(totals.input_tokens, 600);
        assert_eq!(totals.output_tokens, 60);
        assert_eq!(totals.context_length, 2_100);
        assert_eq!(totals.context_limit, 200_000);
        assert_cost(totals.cost, 0.875);
    }

    #[test]
    fn empty_ledger_reports_zero_totals_and_no_rows() {
        let ledger = UsageLedger::new();
        assert_eq!(ledger.compute_team_totals(), UsageSnapshot::default());
        assert!(ledger.session_breakdown_rows().is_empty());
        assert_eq!(ledger.compute_root_exclusive_usage(), None);

        let totals = ledger.render_totals();
        assert_eq!(totals.label, None);
        assert_eq!(totals.usage, UsageSnapshot::default());
    }

    #[test]
    fn render_totals_labels_team_total_without_changing_numbers() {
        let mut ledger = UsageLedger::new();
        ledger.record_event(&self_report("s1", "root", usage(3, 4, 0.5)));

        let totals = ledger.render_totals();
        assert_eq!(totals.label, Some(TEAM_TOTAL_LABEL));
        assert_eq!(totals.usage, ledger.compute_team_totals());
    }

    #[test]
    fn exclusive_plus_children_equals_inclusive_without_clamping() {
        let mut ledger = UsageLedger::new();
        ledger.record_event(&TokenUsageEvent {
            self_usage: Some(usage(100, 40, 0.1)),
            inclusive_usage: Some(usage(1_000, 600, 2.0)),
            ..event(Some("root"), Some("lead"))
        });
        let children = [("c1", 300, 100, 0.5), ("c2", 250, 200, 0.75), ("c3", 50, 60, 0.25)];
        for (id, input, output, cost) in children {
            ledger.record_event(&self_report(id, "helper", usage(input, output, cost)));
        }

        let exclusive = ledger.compute_root_exclusive_usage().unwrap();
        let child_input: u64 = children.iter().map(|c| c.1).sum();
        let child_output: u64 = children.iter().map(|c| c.2).sum();
        assert_eq!(exclusive.input_tokens + child_input, 1_000);
        assert_eq!(exclusive.output_tokens + child_output, 600);
        assert_cost(exclusive.cost, 0.5);
    }

    #[test]
    fn exclusive_context_length_is_remaining_tokens() {
        let mut ledger = UsageLedger::new();
        ledger.record_event(&TokenUsageEvent {
            inclusive_usage: Some(UsageSnapshot {
                input_tokens: 1_000,
                output_tokens: 500,
                context_length: 40_000,
                context_limit: 200_000,
                cost: 1.0,
            }),
            ..event(Some("root"), Some("lead"))
        });
        ledger.record_event(&self_report(
            "child",
            "helper",
            UsageSnapshot {
                input_tokens: 200,
                output_tokens: 100,
                context_length: 12_000,
                context_limit: 100_000,
                cost: 0.2,
            },
        ));

        let exclusive = ledger.compute_root_exclusive_usage().unwrap();
        assert_eq!(exclusive.context_length, 1_200);
        assert_eq!(exclusive.context_limit, 200_000);
    }

    #[test]
    fn breakdown_orders_by_session_id_and_is_stable() {
        let mut ledger = UsageLedger::new();
        ledger.record_event(&TokenUsageEvent {
            inclusive_usage: Some(usage(10_000, 10_000, 10.0)),
            ..event(Some("m-root"), Some("lead"))
        });
        for id in ["zeta", "alpha", "kappa", "beta"] {
            ledger.record_event(&self_report(id, &format!("agent-{id}"), usage(1, 1, 0.0)));
        }

        let rows = ledger.session_breakdown_rows();
        let labels: Vec<&str> = rows.iter().map(|row| row.label.as_str()).collect();
        assert_eq!(
            labels,
            ["lead", "agent-alpha", "agent-beta", "agent-kappa", "agent-zeta"]
        );
        assert_eq!(rows, ledger.session_breakdown_rows());
        assert_eq!(rows.iter().filter(|row| row.is_active).count(), 1);
        assert!(rows[2].is_active);
    }

    #[test]
    fn root_row_falls_back_to_default_label() {
        let mut ledger = UsageLedger::new();
        ledger.root_inclusive = Some(usage(1, 1, 0.0));
        assert_eq!(ledger.session_breakdown_rows()[0].label, ROOT_LABEL);

        ledger.root_session_id = Some("root-session".to_string());
        assert_eq!(ledger.session_breakdown_rows()[0].label, "root-session");
    }

    #[test]
    fn root_row_uses_self_usage_without_inclusive_snapshot() {
        let mut ledger = UsageLedger::new();
        ledger.record_event(&self_report("z-root", "lead", usage(10, 0, 0.1)));
        ledger.record_event(&self_report("a-child", "worker", usage(5, 0, 0.05)));

        assert_eq!(ledger.root_session_id(), Some("z-root"));
        assert_eq!(ledger.root_inclusive(), None);

        let rows = ledger.session_breakdown_rows();
        let labels: Vec<&str> = rows.iter().map(|row| row.label.as_str()).collect();
        assert_eq!(labels, ["lead", "worker"]);
        assert_eq!(rows[0].usage, usage(10, 0, 0.1));
        assert!(!rows[0].is_active);
        assert!(rows[1].is_active);
    }

    #[test]
    fn root_session_is_captured_from_first_named_event() {
        let mut ledger = UsageLedger::new();
        ledger.record_event(&event(Some("r1"), Some("lead")));
        ledger.record_event(&TokenUsageEvent {
            inclusive_usage: Some(usage(50, 50, 0.5)),
            ..event(Some("r2"), Some("lead"))
        });

        assert_eq!(ledger.root_session_id(), Some("r1"));
        assert_eq!(ledger.root_inclusive(), Some(usage(50, 50, 0.5)));
    }

    #[test]
    fn repeated_event_is_idempotent() {
        let report = TokenUsageEvent {
            self_usage: Some(usage(12, 8, 0.3)),
            inclusive_usage: Some(usage(40, 20, 0.9)),
            ..event(Some("s1"), Some("lead"))
        };
        let child = self_report("s2", "helper", usage(5, 5, 0.05));

        let mut once = UsageLedger::new();
        once.record_event(&report);
        once.record_event(&child);

        let mut twice = UsageLedger::new();
        twice.record_event(&report);
        twice.record_event(&report);
        twice.record_event(&child);
        twice.record_event(&child);

        assert_eq!(once, twice);
        assert_eq!(once.compute_team_totals(), twice.compute_team_totals());
    }

    #[test]
    fn counters_stay_non_negative_for_skewed_reports() {
        let mut ledger = UsageLedger::new();
        let mut seed: u64 = 0x5eed;
        let mut next = || {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            seed >> 33
        };

        for step in 0..200 {
            let roll = next();
            let snapshot = UsageSnapshot {
                input_tokens: next() % 1_000,
                output_tokens: next() % 1_000,
                context_length: next() % 5_000,
                context_limit: next() % 200_000,
                cost: (next() % 400) as f64 / 100.0 - 1.0,
            };
            let session = format!("s{}", roll % 6);
            let agent = if roll % 3 == 0 { "lead" } else { "helper" };
            let report = if step % 2 == 0 {
                TokenUsageEvent {
                    inclusive_usage: Some(snapshot),
                    ..event(Some(session.as_str()), Some(agent))
                }
            } else {
                TokenUsageEvent {
                    self_usage: Some(snapshot),
                    ..event(Some(session.as_str()), Some(agent))
                }
            };
            ledger.record_event(&report);

            assert!(ledger.compute_team_totals().cost >= 0.0);
            if let Some(exclusive) = ledger.compute_root_exclusive_usage() {
                assert!(exclusive.cost >= 0.0);
                assert_eq!(
                    exclusive.context_length,
                    exclusive.input_tokens + exclusive.output_tokens
                );
            }
            for row in ledger.session_breakdown_rows() {
                assert!(row.usage.cost >= 0.0);
            }
        }
    }
}
