//! End to end pipeline runs against an in-memory flux archive.
use std::sync::Mutex;

use saa_manifold::prelude::*;

/// In-memory measurement provider.
struct Archive(Vec<FluxMeasurement>);

impl FluxDataPort for Archive {
    fn flux_in_region(
        &self,
        region: &GeographicRegion,
        sources: &[String],
    ) -> Result<Vec<FluxMeasurement>, AnalysisError> {
        if sources.iter().any(|s| s == "offline") {
            return Err(AnalysisError::DataSourceUnavailable {
                source_id: "offline".to_string(),
            });
        }
        Ok(self
            .0
            .iter()
            .filter(|m| region.contains(&m.coordinates))
            .cloned()
            .collect())
    }
}

/// Sink that records stages and cancels the run once `cancel_at`
/// is entered.
struct CancelAt<'a> {
    engine: &'a AnalysisEngine,
    analysis_id: &'a str,
    cancel_at: AnalysisStage,
    seen: Mutex<Vec<AnalysisStage>>,
}

impl ProgressSink for CancelAt<'_> {
    fn emit(&self, stage: AnalysisStage, _percent: u8) {
        self.seen.lock().unwrap().push(stage);
        if stage == self.cancel_at {
            assert!(self.engine.cancel(self.analysis_id));
        }
    }
}

fn measurement(lon: f64, lat: f64, alt: f64, flux: f64, epoch: Epoch) -> FluxMeasurement {
    FluxMeasurement {
        coordinates: GeographicCoordinates::new(lon, lat, alt).unwrap(),
        electron_flux: FluxIntensity::new(flux * 0.8, flux * 0.032).unwrap(),
        proton_flux: FluxIntensity::new(flux * 0.2, flux * 0.024).unwrap(),
        epoch,
        source: "ae9_ap9".to_string(),
        quality: DataQuality::High,
    }
}

/// Regular grid of samples drawing one gaussian flux bump.
fn cluster(
    center: (f64, f64, f64),
    peak: f64,
    sigma_deg: f64,
    count: usize,
    epoch: Epoch,
) -> Vec<FluxMeasurement> {
    let side = (count as f64).sqrt().ceil() as usize;
    (0..count)
        .map(|n| {
            let (row, col) = (n / side, n % side);
            let dlon = (col as f64 / (side - 1).max(1) as f64 - 0.5) * 4.0 * sigma_deg;
            let dlat = (row as f64 / (side - 1).max(1) as f64 - 0.5) * 4.0 * sigma_deg;
            let r2 = dlon * dlon + dlat * dlat;
            let flux = peak * (-r2 / (2.0 * sigma_deg * sigma_deg)).exp();
            measurement(center.0 + dlon, center.1 + dlat, center.2, flux.max(1.0), epoch)
        })
        .collect()
}

fn saa_region() -> GeographicRegion {
    GeographicRegion::new(-60.0, -20.0, -40.0, -10.0, 400.0, 600.0).unwrap()
}

fn june_2024() -> Epoch {
    Epoch::from_gregorian_utc_at_midnight(2024, 6, 1)
}

#[test]
fn single_anomaly_end_to_end() {
    let archive = Archive(cluster((-45.0, -20.0, 500.0), 1250.0, 5.0, 50, june_2024()));
    let request = AnalysisRequest::new("scenario-a", saa_region());
    let engine = AnalysisEngine::new();

    let result = engine.analyze(&request, &archive).unwrap();
    assert_eq!(result.status, AnalysisStage::Completed);
    assert_eq!(engine.status("scenario-a"), Some(AnalysisStage::Completed));
    assert_eq!(result.anomalies.len(), 1);

    let anomaly = &result.anomalies[0];
    assert!(
        (anomaly.center_coordinates.longitude + 45.0).abs() <= 2.0,
        "center longitude {}",
        anomaly.center_coordinates.longitude
    );
    assert!(
        (anomaly.center_coordinates.latitude + 20.0).abs() <= 2.0,
        "center latitude {}",
        anomaly.center_coordinates.latitude
    );
    assert!(
        anomaly.confidence_level > 0.8,
        "confidence {}",
        anomaly.confidence_level
    );
    assert!(anomaly.intensity_peak > 1000.0);
    assert!(anomaly.intensity_uncertainty > 0.0);
    assert_eq!(anomaly.detection_epoch, june_2024());

    assert_eq!(result.metadata.accepted_count, 50);
    assert_eq!(result.metadata.rejected_count, 0);
    assert!(result.metadata.quality_score > 0.9);
    assert!(!result.metadata.degraded);
    assert!(!result.manifold.is_empty());
    assert_eq!(result.field.spec.dimensions(), (41, 31, 5));
}

#[test]
fn two_anomalies_never_merge() {
    let mut data = cluster((-50.0, -28.0, 500.0), 1250.0, 4.0, 36, june_2024());
    data.extend(cluster((-32.0, -18.0, 500.0), 1150.0, 4.0, 36, june_2024()));
    let archive = Archive(data);
    let request = AnalysisRequest::new("scenario-b", saa_region());
    let engine = AnalysisEngine::new();

    let result = engine.analyze(&request, &archive).unwrap();
    assert_eq!(result.anomalies.len(), 2, "separated regions must stay distinct");
    assert!(result.anomalies[0].intensity_peak >= result.anomalies[1].intensity_peak);
    assert_ne!(result.anomalies[0].id, result.anomalies[1].id);
}

#[test]
fn cancellation_at_stage_boundary() {
    let archive = Archive(cluster((-45.0, -20.0, 500.0), 1250.0, 5.0, 50, june_2024()));
    let request = AnalysisRequest::new("scenario-c", saa_region());
    let engine = AnalysisEngine::new();
    let sink = CancelAt {
        engine: &engine,
        analysis_id: "scenario-c",
        cancel_at: AnalysisStage::Interpolating,
        seen: Mutex::new(Vec::new()),
    };

    let outcome = engine.analyze_with_progress(&request, &archive, &sink);
    assert_eq!(
        outcome,
        Err(AnalysisError::Cancelled {
            last_completed: AnalysisStage::Interpolating,
        })
    );
    assert_eq!(engine.status("scenario-c"), Some(AnalysisStage::Cancelled));

    // later stages were never entered
    let seen = sink.seen.lock().unwrap();
    assert!(!seen.contains(&AnalysisStage::AnalyzingTopology));
    assert!(!seen.contains(&AnalysisStage::DetectingAnomalies));

    // a terminal run cannot be cancelled again
    assert!(!engine.cancel("scenario-c"));
}

#[test]
fn identical_requests_identical_results() {
    let archive = Archive(cluster((-45.0, -20.0, 500.0), 1250.0, 5.0, 50, june_2024()));
    let request = AnalysisRequest::new("repeat", saa_region());
    let a = AnalysisEngine::new().analyze(&request, &archive).unwrap();
    let b = AnalysisEngine::new().analyze(&request, &archive).unwrap();
    // wall clock metadata aside, identical runs are bit identical
    assert_eq!(a.anomalies, b.anomalies);
    assert_eq!(a.field, b.field);
    assert_eq!(a.manifold, b.manifold);
}

#[test]
fn temporal_annotation_from_multi_epoch_series() {
    let mut data = Vec::new();
    for year in 2020..2025 {
        let epoch = Epoch::from_gregorian_utc_at_midnight(year, 6, 1);
        // slow westward drift of the bump center
        let lon = -45.0 - 0.2 * (year - 2020) as f64;
        data.extend(cluster((lon, -20.0, 500.0), 1250.0, 5.0, 36, epoch));
    }
    let archive = Archive(data);
    let request = AnalysisRequest::new("temporal", saa_region()).with_temporal();
    let engine = AnalysisEngine::new();

    let result = engine.analyze(&request, &archive).unwrap();
    assert_eq!(result.anomalies.len(), 1);
    let anomaly = &result.anomalies[0];
    let stability = anomaly.temporal_stability.expect("stability missing");
    assert!((0.0..=1.0).contains(&stability));
    let drift = anomaly.drift_rate.expect("drift missing");
    assert!(drift < 0.0, "drift {} is not westward", drift);
}

#[test]
fn insufficient_data_is_fatal() {
    let archive = Archive(vec![measurement(-45.0, -20.0, 500.0, 1000.0, june_2024())]);
    let request = AnalysisRequest::new("sparse", saa_region());
    let engine = AnalysisEngine::new();
    let outcome = engine.analyze(&request, &archive);
    assert!(matches!(
        outcome,
        Err(AnalysisError::InsufficientData { available: 1, required: 4 })
    ));
    assert_eq!(engine.status("sparse"), Some(AnalysisStage::Failed));
}

#[test]
fn offline_source_propagates() {
    let archive = Archive(Vec::new());
    let request =
        AnalysisRequest::new("offline", saa_region()).with_data_sources(&["offline"]);
    let outcome = AnalysisEngine::new().analyze(&request, &archive);
    assert_eq!(
        outcome,
        Err(AnalysisError::DataSourceUnavailable {
            source_id: "offline".to_string(),
        })
    );
}

#[test]
fn result_wire_shape() {
    let archive = Archive(cluster((-45.0, -20.0, 500.0), 1250.0, 5.0, 50, june_2024()));
    let request = AnalysisRequest::new("wire", saa_region());
    let result = AnalysisEngine::new().analyze(&request, &archive).unwrap();

    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["analysis_id"], "wire");
    assert_eq!(value["status"], "completed");

    let anomaly = &value["anomalies"][0];
    assert!(anomaly["id"].as_str().unwrap().starts_with("saa-wire-"));
    assert!(anomaly["center_coordinates"]["longitude"].is_number());
    assert!(anomaly["center_coordinates"]["latitude"].is_number());
    assert!(anomaly["center_coordinates"]["altitude"].is_number());
    assert!(anomaly["intensity_peak"].is_number());
    assert!(anomaly["intensity_uncertainty"].is_number());
    assert!(anomaly["spatial_extent"]["longitude_span"].is_number());
    assert!(anomaly["spatial_extent"]["latitude_span"].is_number());
    assert!(anomaly["spatial_extent"]["altitude_span"].is_number());
    assert!(anomaly["confidence_level"].is_number());
    // temporal fields stay off the wire until computed
    assert!(anomaly.get("drift_rate").is_none());

    let manifold = &value["manifold"];
    assert!(manifold["vertices"].is_array());
    assert!(manifold["faces"].is_array());
    assert!(manifold["flux_values"].is_array());
    assert!(manifold["metadata"].is_object());
}
