//! # Layers and Routing Policy
//!
//! Architectural layers are pure routing tags. The `LayerGraph` answers
//! "may a message travel from layer A to layer B".
//!
//! ## Routing Matrix
//!
//! | Source | Allowed Destinations |
//! |--------|----------------------|
//! | Presentation | Application, Domain |
//! | Application | Domain, Infrastructure |
//! | Domain | Domain |
//! | Infrastructure | Infrastructure, External |
//! | External | Infrastructure |
//!
//! A message without a destination is a broadcast and is always permitted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Architectural layer used as a routing tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// UI, API controllers.
    Presentation,
    /// Use cases and orchestration.
    Application,
    /// Business rules. Never depends outward.
    Domain,
    /// Persistence, messaging, adapters.
    Infrastructure,
    /// Third-party systems.
    External,
}

impl Layer {
    /// Every layer, in matrix order.
    pub const ALL: [Layer; 5] = [
        Layer::Presentation,
        Layer::Application,
        Layer::Domain,
        Layer::Infrastructure,
        Layer::External,
    ];

    /// Lowercase name used in metadata, logs and metric labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Presentation => "presentation",
            Self::Application => "application",
            Self::Domain => "domain",
            Self::Infrastructure => "infrastructure",
            Self::External => "external",
        }
    }

    /// Check the standard graph for a `self -> destination` edge.
    #[must_use]
    pub fn can_route(self, destination: Layer) -> bool {
        LayerGraph::STANDARD.can_route(self, destination)
    }

    /// Layers this layer may send to.
    #[must_use]
    pub fn valid_targets(self) -> Vec<Layer> {
        LayerGraph::STANDARD.valid_targets(self)
    }

    /// Layers allowed to send to this layer.
    #[must_use]
    pub fn valid_sources(self) -> Vec<Layer> {
        LayerGraph::STANDARD.valid_sources(self)
    }

    fn index(self) -> usize {
        match self {
            Self::Presentation => 0,
            Self::Application => 1,
            Self::Domain => 2,
            Self::Infrastructure => 3,
            Self::External => 4,
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown layer name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown layer: {0}")]
pub struct UnknownLayer(pub String);

impl FromStr for Layer {
    type Err = UnknownLayer;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Layer::ALL
            .into_iter()
            .find(|layer| layer.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownLayer(s.to_string()))
    }
}

/// A message tried to cross a forbidden layer edge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Routing violation: {from} cannot route to {to} (valid targets: {})", format_layers(.valid_targets))]
pub struct RoutingViolation {
    /// Layer the message originated from.
    pub from: Layer,
    /// Requested destination.
    pub to: Layer,
    /// Destinations `from` is allowed to reach.
    pub valid_targets: Vec<Layer>,
}

fn format_layers(layers: &[Layer]) -> String {
    if layers.is_empty() {
        return "none".to_string();
    }
    layers
        .iter()
        .map(Layer::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fixed directed adjacency table over `Layer::ALL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerGraph {
    edges: [[bool; 5]; 5],
}

impl LayerGraph {
    /// The standard dependency direction policy.
    pub const STANDARD: LayerGraph = LayerGraph {
        edges: [
            // presentation -> application, domain
            [false, true, true, false, false],
            // application -> domain, infrastructure
            [false, false, true, true, false],
            // domain -> domain
            [false, false, true, false, false],
            // infrastructure -> infrastructure, external
            [false, false, false, true, true],
            // external -> infrastructure
            [false, false, false, true, false],
        ],
    };

    /// A graph allowing exactly the listed `(source, destination)` edges.
    #[must_use]
    pub fn from_edges(edges: impl IntoIterator<Item = (Layer, Layer)>) -> Self {
        let mut graph = LayerGraph {
            edges: [[false; 5]; 5],
        };
        for (source, destination) in edges {
            graph.edges[source.index()][destination.index()] = true;
        }
        graph
    }

    /// Whether `source` may send to `destination`.
    #[must_use]
    pub fn can_route(&self, source: Layer, destination: Layer) -> bool {
        self.edges[source.index()][destination.index()]
    }

    #[must_use]
    pub fn valid_targets(&self, source: Layer) -> Vec<Layer> {
        Layer::ALL
            .into_iter()
            .filter(|destination| self.can_route(source, *destination))
            .collect()
    }

    #[must_use]
    pub fn valid_sources(&self, destination: Layer) -> Vec<Layer> {
        Layer::ALL
            .into_iter()
            .filter(|source| self.can_route(*source, destination))
            .collect()
    }

    /// Validate a route. `None` destination is a broadcast and always passes.
    ///
    /// # Errors
    ///
    /// Returns `RoutingViolation` carrying the valid target set when the edge
    /// is not part of the graph.
    pub fn check(&self, source: Layer, destination: Option<Layer>) -> Result<(), RoutingViolation> {
        let Some(destination) = destination else {
            return Ok(());
        };
        if self.can_route(source, destination) {
            return Ok(());
        }
        Err(RoutingViolation {
            from: source,
            to: destination,
            valid_targets: self.valid_targets(source),
        })
    }

    /// Whether any of `layers` is reachable from `source`.
    #[must_use]
    pub fn reaches_any(&self, source: Layer, layers: &[Layer]) -> bool {
        layers.iter().any(|layer| self.can_route(source, *layer))
    }
}

impl Default for LayerGraph {
    fn default() -> Self {
        Self::STANDARD
    }
}
