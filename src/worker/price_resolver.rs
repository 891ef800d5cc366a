use std::collections::{BTreeMap, BTreeSet};

use log::warn;

use crate::config::AggregatorSettings;

/// Directed price observation between two symbols.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceEdge {
    /// Units of the target token per unit of the source token.
    pub price: f64,
    /// 24h volume of the source token in this pair.
    pub volume: f64,
}

/// Symbol-level view of every pair observed this cycle.
///
/// Each pair contributes `base -> quote` at its last price and, when that
/// price is non-zero, `quote -> base` at the inverse. A later pair over the
/// same two symbols replaces the earlier edges.
#[derive(Debug, Clone, Default)]
pub struct PriceGraph {
    edges: BTreeMap<String, BTreeMap<String, PriceEdge>>,
}

impl PriceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pair(
        &mut self,
        base: &str,
        quote: &str,
        price: f64,
        base_volume: f64,
        quote_volume: f64,
    ) {
        self.edges.entry(base.to_string()).or_default().insert(
            quote.to_string(),
            PriceEdge {
                price,
                volume: base_volume,
            },
        );

        let reverse = self.edges.entry(quote.to_string()).or_default();
        if price != 0.0 {
            reverse.insert(
                base.to_string(),
                PriceEdge {
                    price: 1.0 / price,
                    volume: quote_volume,
                },
            );
        }
    }

    pub fn edge(&self, from: &str, to: &str) -> Option<&PriceEdge> {
        self.edges.get(from)?.get(to)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    fn neighbours(&self, from: &str) -> impl Iterator<Item = (&str, &PriceEdge)> {
        self.edges
            .get(from)
            .into_iter()
            .flat_map(|m| m.iter().map(|(k, v)| (k.as_str(), v)))
    }
}

/// Derives fiat prices for every symbol reachable from the seed tokens.
///
/// Stable tokens are worth exactly 1 and the reference token is read off its
/// pair with the stable anchor. Prices then spread one hop out of each base
/// token in order, and once more out of the anchor token. A neighbour is only
/// priced if it has no price yet and the edge's volume times the known price
/// exceeds the qualification threshold. Everything else stays unpriced.
#[derive(Debug, Clone)]
pub struct PriceResolver {
    stable_tokens: BTreeSet<String>,
    base_tokens: Vec<String>,
    reference_token: String,
    stable_anchor: String,
    anchor_token: String,
    qualified_volume: f64,
}

impl PriceResolver {
    pub fn new(settings: &AggregatorSettings) -> Self {
        Self {
            stable_tokens: settings.stable_tokens.iter().cloned().collect(),
            base_tokens: settings.base_tokens.clone(),
            reference_token: settings.reference_token.clone(),
            stable_anchor: settings.stable_anchor.clone(),
            anchor_token: settings.anchor_token.clone(),
            qualified_volume: settings.qualified_volume,
        }
    }

    pub fn resolve(&self, graph: &PriceGraph) -> BTreeMap<String, f64> {
        let mut prices: BTreeMap<String, f64> = graph
            .symbols()
            .filter(|s| self.stable_tokens.contains(*s))
            .map(|s| (s.to_string(), 1.0))
            .collect();

        match graph.edge(&self.reference_token, &self.stable_anchor) {
            Some(edge) => {
                prices.insert(self.reference_token.clone(), edge.price);
            },
            None => warn!(
                "No {}/{} pair observed, {} stays unpriced",
                self.reference_token, self.stable_anchor, self.reference_token
            ),
        }

        for seed in self.base_tokens.iter().chain(std::iter::once(&self.anchor_token)) {
            self.propagate_from(seed, graph, &mut prices);
        }

        prices
    }

    fn propagate_from(&self, seed: &str, graph: &PriceGraph, prices: &mut BTreeMap<String, f64>) {
        let known = prices.get(seed).copied().unwrap_or(0.0);

        for (other, edge) in graph.neighbours(seed) {
            if prices.contains_key(other) || edge.price == 0.0 {
                continue;
            }
            // Thin pairs must not set global prices.
            if edge.volume * known > self.qualified_volume {
                prices.insert(other.to_string(), known / edge.price);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> PriceResolver {
        PriceResolver::new(&AggregatorSettings::default())
    }

    #[test]
    fn test_reference_and_one_hop() {
        let mut graph = PriceGraph::new();
        graph.add_pair("WBNB", "BUSD", 400.0, 10.0, 4_000.0);
        // 0.1 X per WBNB
        graph.add_pair("WBNB", "X", 0.1, 5.0, 0.5);

        let prices = resolver().resolve(&graph);

        assert_eq!(prices.get("BUSD"), Some(&1.0));
        assert_eq!(prices.get("WBNB"), Some(&400.0));
        assert!((prices["X"] - 4_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_low_volume_edge_does_not_price() {
        let mut graph = PriceGraph::new();
        graph.add_pair("WBNB", "BUSD", 400.0, 10.0, 4_000.0);
        // 0.2 WBNB * 400 = 80 < 100
        graph.add_pair("WBNB", "X", 0.1, 0.2, 0.02);

        let prices = resolver().resolve(&graph);

        assert!(!prices.contains_key("X"));
    }

    #[test]
    fn test_stable_side_prices_through_reverse_edge() {
        let mut graph = PriceGraph::new();
        graph.add_pair("WBNB", "BUSD", 400.0, 10.0, 4_000.0);
        // Y quoted in BUSD: 2 BUSD per Y, 1000 BUSD of volume on the BUSD side
        graph.add_pair("Y", "BUSD", 2.0, 500.0, 1_000.0);

        let prices = resolver().resolve(&graph);

        assert_eq!(prices.get("Y"), Some(&2.0));
    }

    #[test]
    fn test_anchor_token_is_second_generation() {
        let mut graph = PriceGraph::new();
        graph.add_pair("WBNB", "BUSD", 400.0, 10.0, 4_000.0);
        graph.add_pair("Cake", "WBNB", 0.05, 1_000.0, 50.0);
        // Z only trades against Cake; 3 Z per Cake
        graph.add_pair("Cake", "Z", 3.0, 100.0, 300.0);
        // W is two hops from Cake and stays unpriced
        graph.add_pair("Z", "W", 1.0, 1_000.0, 1_000.0);

        let prices = resolver().resolve(&graph);

        let cake = prices["Cake"];
        assert!((cake - 20.0).abs() < 1e-9);
        assert!((prices["Z"] - cake / 3.0).abs() < 1e-9);
        assert!(!prices.contains_key("W"));
    }

    #[test]
    fn test_first_price_wins() {
        let mut graph = PriceGraph::new();
        graph.add_pair("WBNB", "BUSD", 400.0, 10.0, 4_000.0);
        // X is reachable from WBNB (4000) and from BUSD (5)
        graph.add_pair("WBNB", "X", 0.1, 10.0, 1.0);
        graph.add_pair("X", "BUSD", 5.0, 1_000.0, 5_000.0);

        let prices = resolver().resolve(&graph);

        assert!((prices["X"] - 4_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_reference_pair_leaves_reference_unpriced() {
        let mut graph = PriceGraph::new();
        graph.add_pair("WBNB", "X", 0.1, 1_000.0, 100.0);

        let prices = resolver().resolve(&graph);

        assert!(prices.is_empty());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let mut graph = PriceGraph::new();
        graph.add_pair("WBNB", "BUSD", 400.0, 10.0, 4_000.0);
        for (i, sym) in ["A", "B", "C", "D", "E", "F"].iter().enumerate() {
            graph.add_pair("WBNB", sym, (i + 1) as f64, 10.0, 10.0);
            graph.add_pair(sym, "BUSD", 3.0, 100.0, 300.0);
        }

        let first = resolver().resolve(&graph);
        for _ in 0..10 {
            assert_eq!(resolver().resolve(&graph), first);
        }
    }

    #[test]
    fn test_zero_price_pair_has_no_reverse_edge() {
        let mut graph = PriceGraph::new();
        graph.add_pair("X", "Y", 0.0, 1.0, 1.0);

        assert!(graph.edge("X", "Y").is_some());
        assert!(graph.edge("Y", "X").is_none());
        assert_eq!(graph.symbols().count(), 2);
    }
}
