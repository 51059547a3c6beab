//! Load balancer strategy (§4.4): a minimal `Select` interface with two
//! built-ins, used for proxy selection inside the HTTP worker.

use std::collections::HashMap;

/// One selectable instance: an opaque id plus a relative weight and current
/// outstanding-request count.
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: String,
    pub weight: u32,
    pub outstanding: u32,
}

pub trait LoadBalancerStrategy: Send + Sync {
    /// Selects one instance from a non-empty slice. Returns `None` only when
    /// `instances` is empty.
    fn select(&mut self, instances: &[Instance]) -> Option<String>;

    fn name(&self) -> &'static str;
}

/// Deficit-counter weighted round robin: each instance accumulates its
/// weight every round; the winner is debited by the total weight.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    deficits: HashMap<String, i64>,
}

impl LoadBalancerStrategy for WeightedRoundRobin {
    fn select(&mut self, instances: &[Instance]) -> Option<String> {
        if instances.is_empty() {
            return None;
        }

        let total_weight: i64 = instances.iter().map(|i| i.weight as i64).sum();
        for inst in instances {
            *self.deficits.entry(inst.id.clone()).or_insert(0) += inst.weight as i64;
        }

        let winner = instances
            .iter()
            .max_by_key(|inst| self.deficits.get(&inst.id).copied().unwrap_or(0))?
            .id
            .clone();

        if let Some(deficit) = self.deficits.get_mut(&winner) {
            *deficit -= total_weight;
        }

        Some(winner)
    }

    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }
}

/// Chooses the instance with the fewest outstanding requests, ties broken by
/// input order.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LoadBalancerStrategy for LeastConnections {
    fn select(&mut self, instances: &[Instance]) -> Option<String> {
        instances
            .iter()
            .min_by_key(|inst| inst.outstanding)
            .map(|inst| inst.id.clone())
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}

/// Builds a strategy by name, falling back to weighted round robin for any
/// unknown name (§4.4).
pub fn strategy_for_name(name: &str) -> Box<dyn LoadBalancerStrategy> {
    match name {
        "least_connections" => Box::new(LeastConnections),
        _ => Box::new(WeightedRoundRobin::default()),
    }
}
