pub mod engine;
pub mod types;


pub use engine::{AIRouter, rank};
pub use types::{BalancedWeights, RouteCandidate, RoutingConfig, RoutingDecision, RoutingMode};
