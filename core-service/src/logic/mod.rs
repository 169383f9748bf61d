pub mod features;
pub mod model;
pub mod dataset;
pub mod training;
pub mod inference;
