//! Features Module - Feature Contract Engine
//!
//! Maps raw named observations to the ordered vector a trained model expects.
//! The contract (`FeatureSpec`) is versioned and validated before anything is served.

pub mod layout;
pub mod derived;
pub mod defaults;
pub mod vector;
pub mod presets;

#[cfg(test)]
mod tests;

// Re-export common types
pub use layout::{
    DefaultedFeature, FeatureSource, FeatureSpec, FeatureSpecBuilder, FeatureSpecError,
    HistorySource, LayoutInfo,
};
pub use derived::DerivedFeature;
pub use defaults::{DefaultsTable, FallbackPolicy};
pub use vector::{
    build, BuildError, FeatureBuilder, FeatureVector, FieldValue, ObservationRequest,
};
