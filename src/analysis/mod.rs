//! Pattern/Metric Analyzer (§4.11): centrality, clustering, path-finding, and
//! suspicious-pattern detection over an already-assembled graph.

pub mod centrality;
pub mod paths;
pub mod patterns;
pub mod risk;

pub use patterns::Pattern;
pub use risk::RiskAssessment;
