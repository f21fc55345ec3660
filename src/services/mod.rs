pub mod dataset;
pub mod features;
pub mod recommendation;
pub mod training;

use dataset::Dataset;
use features::{FeatureEncoder, FeatureTables};

/// A loaded dataset together with the feature data derived from it. Shared
/// read-only between training and inference.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub dataset: Dataset,
    pub encoder: FeatureEncoder,
    pub features: FeatureTables,
}

impl PreparedData {
    pub fn new(dataset: Dataset) -> Self {
        let encoder = FeatureEncoder::for_dataset(&dataset);
        let features = FeatureTables::build(&dataset, &encoder);
        Self {
            dataset,
            encoder,
            features,
        }
    }
}
