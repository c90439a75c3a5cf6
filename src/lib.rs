#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod analysis;
pub mod coords;
pub mod detection;
pub mod flux;
pub mod grid;
pub mod igrf;
pub mod interp;
pub mod mesh;
pub mod temporal;
pub mod topology;
pub mod validation;

mod epoch;
mod errors;
mod uncertainty;

pub use errors::AnalysisError;
pub use uncertainty::WeightedMean;

pub use epoch::decimal_year;

/// Package to include all basic structures
pub mod prelude {
    // export
    pub use crate::{
        analysis::{
            AnalysisEngine, AnalysisRequest, AnalysisResult, AnalysisStage, CancelToken,
            FluxDataPort, ProgressSink,
        },
        coords::{
            GeographicCoordinates, GeographicRegion, GeomagneticCoordinates, SpatialBounds,
        },
        detection::{DetectionConfig, SaaAnomaly},
        errors::AnalysisError,
        flux::{DataQuality, FluxIntensity, FluxMeasurement, UncertaintySource},
        grid::{FluxField, GridSpec, Resolution},
        igrf::{CoordinateTransformer, FieldComponents, GeomagneticModelPort, IgrfModel, IGRF13},
        interp::{FluxInterpolator, InterpolatorConfig, Method},
        mesh::ManifoldMesh,
        temporal::SecularVariationResult,
        topology::TopologyReport,
        validation::{DataValidator, ValidationReport},
    };
    // pub re-export
    pub use hifitime::{Duration, Epoch, TimeScale, Unit};
}
