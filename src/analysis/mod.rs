//! Analysis orchestration: stage machine, cancellation, progress
//! reporting and the session registry.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use hifitime::{Epoch, Unit};
use itertools::Itertools;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    coords::GeographicRegion,
    detection::{self, DetectionConfig, SaaAnomaly},
    epoch::now_utc,
    errors::AnalysisError,
    flux::FluxMeasurement,
    grid::{FluxField, GridSpec, Resolution},
    igrf::{IgrfModel, IGRF13},
    interp::{FactorizationCache, FluxInterpolator, InterpolatorConfig, Method},
    mesh::ManifoldMesh,
    temporal,
    topology::{self, TopologyReport},
    validation::{DataValidator, ValidationReport},
};

/// Stages an analysis run moves through, in order. Terminal stages
/// are [Completed], [Failed] and [Cancelled].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStage {
    #[default]
    Pending,
    Validating,
    Interpolating,
    AnalyzingTopology,
    DetectingAnomalies,
    TemporalAnalysis,
    Completed,
    Failed,
    Cancelled,
}

impl AnalysisStage {
    /// Nominal progress at entry of this stage, in percent.
    pub fn percent(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Validating => 10,
            Self::Interpolating => 45,
            Self::AnalyzingTopology => 70,
            Self::DetectingAnomalies => 85,
            Self::TemporalAnalysis => 95,
            Self::Completed => 100,
            Self::Failed | Self::Cancelled => 100,
        }
    }
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Validating => write!(f, "validating"),
            Self::Interpolating => write!(f, "interpolating"),
            Self::AnalyzingTopology => write!(f, "analyzing_topology"),
            Self::DetectingAnomalies => write!(f, "detecting_anomalies"),
            Self::TemporalAnalysis => write!(f, "temporal_analysis"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Receives stage transitions while a run executes.
/// Implementations must be cheap: emission happens on the analysis
/// thread.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, _stage: AnalysisStage, _percent: u8) {}
}

/// Sink that drops every event.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Cooperative cancellation handle. Cloning shares the flag.
/// The pipeline observes it at stage boundaries only: a stage that
/// has started always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Epoch>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    /// Token that also trips once `deadline` has passed.
    pub fn with_deadline(deadline: Epoch) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        self.deadline.map_or(false, |d| now_utc() > d)
    }
}

/// Abstract measurement provider. Adapters over AE9/AP9 tables,
/// archives or live feeds implement this.
pub trait FluxDataPort: Send + Sync {
    /// All measurements inside `region` coming from any of `sources`.
    fn flux_in_region(
        &self,
        region: &GeographicRegion,
        sources: &[String],
    ) -> Result<Vec<FluxMeasurement>, AnalysisError>;
}

/// One analysis job description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub analysis_id: String,
    pub region: GeographicRegion,
    pub resolution: Resolution,
    pub data_sources: Vec<String>,
    pub interpolation: InterpolatorConfig,
    pub detection: DetectionConfig,
    /// Run the secular variation stage and annotate anomalies
    pub include_temporal: bool,
    /// Altitude layer exported to the mesh. Defaults to the layer
    /// holding the strongest node.
    pub mesh_layer: Option<usize>,
}

impl AnalysisRequest {
    pub fn new(analysis_id: &str, region: GeographicRegion) -> Self {
        Self {
            analysis_id: analysis_id.to_string(),
            region,
            resolution: Resolution::default(),
            data_sources: vec!["ae9_ap9".to_string()],
            interpolation: InterpolatorConfig::default(),
            detection: DetectionConfig::default(),
            include_temporal: false,
            mesh_layer: None,
        }
    }
    pub fn with_resolution(&self, resolution: Resolution) -> Self {
        let mut s = self.clone();
        s.resolution = resolution;
        s
    }
    pub fn with_method(&self, method: Method) -> Self {
        let mut s = self.clone();
        s.interpolation = s.interpolation.with_method(method);
        s
    }
    pub fn with_data_sources(&self, sources: &[&str]) -> Self {
        let mut s = self.clone();
        s.data_sources = sources.iter().map(|x| x.to_string()).collect();
        s
    }
    pub fn with_temporal(&self) -> Self {
        let mut s = self.clone();
        s.include_temporal = true;
        s
    }
    fn validate(&self) -> Result<(), AnalysisError> {
        if self.analysis_id.trim().is_empty() {
            return Err(AnalysisError::validation("empty analysis id"));
        }
        if self.data_sources.is_empty() {
            return Err(AnalysisError::validation("no data source selected"));
        }
        if self.interpolation.min_points == 0 {
            return Err(AnalysisError::validation("min_points must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.detection.extent_fraction) || self.detection.extent_fraction == 0.0 {
            return Err(AnalysisError::validation(format!(
                "extent fraction {} outside (0, 1)",
                self.detection.extent_fraction
            )));
        }
        Ok(())
    }
}

/// Run bookkeeping attached to a completed result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    /// Measurements returned by the data port
    pub measurement_count: usize,
    pub accepted_count: usize,
    pub rejected_count: usize,
    /// Aggregate data quality, [0, 1]
    pub quality_score: f64,
    pub warnings: Vec<String>,
    pub first_epoch: Option<Epoch>,
    pub last_epoch: Option<Epoch>,
    /// Wall clock start and completion of the run
    pub started: Epoch,
    pub completed: Epoch,
    pub last_completed_stage: AnalysisStage,
    /// True when the field came from the degraded fallback path
    pub degraded: bool,
}

/// Everything a completed run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub analysis_id: String,
    pub status: AnalysisStage,
    pub anomalies: Vec<SaaAnomaly>,
    pub field: FluxField,
    pub manifold: ManifoldMesh,
    pub metadata: AnalysisMetadata,
}

#[derive(Clone)]
struct Session {
    stage: Arc<Mutex<AnalysisStage>>,
    token: CancelToken,
}

/// Registry size at which finished runs are evicted. Active runs are
/// never evicted.
const SESSION_RETENTION: usize = 256;

/// Synchronous analysis engine with a concurrent session registry.
/// One engine instance is meant to be shared: the kernel
/// factorization cache lives here and persists across runs.
pub struct AnalysisEngine {
    model: &'static IgrfModel,
    cache: Arc<FactorizationCache>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl Default for AnalysisEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisEngine {
    pub fn new() -> Self {
        Self {
            model: &IGRF13,
            cache: Arc::new(FactorizationCache::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Runs a request to completion without progress reporting.
    pub fn analyze(
        &self,
        request: &AnalysisRequest,
        data: &dyn FluxDataPort,
    ) -> Result<AnalysisResult, AnalysisError> {
        self.analyze_with_progress(request, data, &NoProgress)
    }

    /// Runs a request to completion, emitting stage transitions.
    ///
    /// The run is registered in the session registry for the whole
    /// duration, so a concurrent [Self::cancel] call takes effect at
    /// the next stage boundary.
    pub fn analyze_with_progress(
        &self,
        request: &AnalysisRequest,
        data: &dyn FluxDataPort,
        progress: &dyn ProgressSink,
    ) -> Result<AnalysisResult, AnalysisError> {
        request.validate()?;
        let session = Session {
            stage: Arc::new(Mutex::new(AnalysisStage::Pending)),
            token: CancelToken::new(),
        };
        self.register(&request.analysis_id, session.clone());

        let outcome = self.pipeline(request, data, progress, &session);
        let terminal = match &outcome {
            Ok(_) => AnalysisStage::Completed,
            Err(AnalysisError::Cancelled { .. }) => AnalysisStage::Cancelled,
            Err(_) => AnalysisStage::Failed,
        };
        *session.stage.lock().unwrap() = terminal;
        progress.emit(terminal, terminal.percent());
        if let Err(error) = &outcome {
            warn!("analysis {} ended: {}", request.analysis_id, error);
        }
        outcome
    }

    /// Tracks a starting run, evicting terminal sessions once the
    /// registry fills up.
    fn register(&self, analysis_id: &str, session: Session) {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.len() >= SESSION_RETENTION {
            sessions.retain(|_, s| !s.stage.lock().unwrap().is_terminal());
        }
        sessions.insert(analysis_id.to_string(), session);
    }

    /// Last observed stage of a run, if the id is known.
    pub fn status(&self, analysis_id: &str) -> Option<AnalysisStage> {
        self.sessions
            .lock()
            .unwrap()
            .get(analysis_id)
            .map(|s| *s.stage.lock().unwrap())
    }

    /// Requests cancellation. Returns false for unknown ids and for
    /// runs that already reached a terminal stage.
    pub fn cancel(&self, analysis_id: &str) -> bool {
        let sessions = self.sessions.lock().unwrap();
        match sessions.get(analysis_id) {
            Some(session) if !session.stage.lock().unwrap().is_terminal() => {
                session.token.cancel();
                true
            },
            _ => false,
        }
    }

    fn enter(
        &self,
        session: &Session,
        progress: &dyn ProgressSink,
        stage: AnalysisStage,
    ) {
        *session.stage.lock().unwrap() = stage;
        progress.emit(stage, stage.percent());
    }

    fn checkpoint(
        &self,
        session: &Session,
        completed: AnalysisStage,
    ) -> Result<(), AnalysisError> {
        if session.token.is_cancelled() {
            debug!("cancellation observed after {}", completed);
            return Err(AnalysisError::Cancelled {
                last_completed: completed,
            });
        }
        Ok(())
    }

    fn pipeline(
        &self,
        request: &AnalysisRequest,
        data: &dyn FluxDataPort,
        progress: &dyn ProgressSink,
        session: &Session,
    ) -> Result<AnalysisResult, AnalysisError> {
        let started = now_utc();
        self.enter(session, progress, AnalysisStage::Validating);
        let measurements = data.flux_in_region(&request.region, &request.data_sources)?;
        let measurement_count = measurements.len();
        let report = DataValidator::new(&request.region, self.model).validate(measurements);
        info!(
            "analysis {}: {} of {} measurement(s) accepted, quality {:.2}",
            request.analysis_id,
            report.accepted.len(),
            measurement_count,
            report.quality_score
        );
        self.checkpoint(session, AnalysisStage::Validating)?;

        self.enter(session, progress, AnalysisStage::Interpolating);
        // the spatial field is a snapshot of the latest state; older
        // epochs feed the temporal series only
        let snapshot = latest_snapshot(&report.accepted);
        if snapshot.len() != report.accepted.len() {
            debug!(
                "spatial snapshot holds {} of {} accepted measurement(s)",
                snapshot.len(),
                report.accepted.len()
            );
        }
        let spec = GridSpec::from_region(&request.region, &request.resolution)?;
        let interpolator = FluxInterpolator::new(request.interpolation, self.cache.clone());
        let field = interpolator.interpolate(&snapshot, spec, request.resolution)?;
        self.checkpoint(session, AnalysisStage::Interpolating)?;

        self.enter(session, progress, AnalysisStage::AnalyzingTopology);
        let topology = topology::analyze(&field);
        self.checkpoint(session, AnalysisStage::AnalyzingTopology)?;

        self.enter(session, progress, AnalysisStage::DetectingAnomalies);
        let detection_epoch = snapshot
            .iter()
            .map(|m| m.epoch)
            .max()
            .unwrap_or_else(now_utc);
        let mut anomalies = detection::detect(
            &field,
            &topology,
            &snapshot,
            &request.detection,
            &request.analysis_id,
            detection_epoch,
        );
        self.checkpoint(session, AnalysisStage::DetectingAnomalies)?;

        let mut last_completed_stage = AnalysisStage::DetectingAnomalies;
        if request.include_temporal {
            self.enter(session, progress, AnalysisStage::TemporalAnalysis);
            annotate_temporal(&mut anomalies, &report.accepted);
            self.checkpoint(session, AnalysisStage::TemporalAnalysis)?;
            last_completed_stage = AnalysisStage::TemporalAnalysis;
        }

        let layer = request
            .mesh_layer
            .unwrap_or_else(|| strongest_layer(&field, &topology));
        let manifold = ManifoldMesh::from_field(&field, layer);

        let (first_epoch, last_epoch) = match report
            .accepted
            .iter()
            .map(|m| m.epoch)
            .minmax()
            .into_option()
        {
            Some((a, b)) => (Some(a), Some(b)),
            None => (None, None),
        };
        Ok(AnalysisResult {
            analysis_id: request.analysis_id.clone(),
            status: AnalysisStage::Completed,
            anomalies,
            metadata: AnalysisMetadata {
                measurement_count,
                accepted_count: report.accepted.len(),
                rejected_count: report.rejected,
                quality_score: report.quality_score,
                warnings: collect_warnings(&report, &field),
                first_epoch,
                last_epoch,
                started,
                completed: now_utc(),
                last_completed_stage,
                degraded: field.degraded,
            },
            manifold,
            field,
        })
    }
}

fn collect_warnings(report: &ValidationReport, field: &FluxField) -> Vec<String> {
    let mut warnings = report.warnings.clone();
    if field.degraded {
        warnings.push("interpolation degraded to inverse distance weighting".to_string());
    }
    warnings
}

/// Measurements taking part in the spatial field: everything within
/// 30 days of the most recent accepted epoch. Interpolating across
/// distant epochs would blend states of a drifting anomaly into one
/// jagged point set.
fn latest_snapshot(measurements: &[FluxMeasurement]) -> Vec<FluxMeasurement> {
    let latest = match measurements.iter().map(|m| m.epoch).max() {
        Some(epoch) => epoch,
        None => return Vec::new(),
    };
    let window = Unit::Day * 30;
    measurements
        .iter()
        .filter(|m| latest - m.epoch <= window)
        .cloned()
        .collect()
}

/// Altitude layer holding the globally strongest node, favored when
/// the caller did not pin one.
fn strongest_layer(field: &FluxField, topology: &TopologyReport) -> usize {
    if let Some(feature) = topology.features.first() {
        return feature.peak.2;
    }
    let (_, _, nk) = field.spec.dimensions();
    let mut best = (0, f64::NEG_INFINITY);
    for k in 0..nk {
        let (ni, nj, _) = field.spec.dimensions();
        for i in 0..ni {
            for j in 0..nj {
                let v = field.value(i, j, k);
                if v > best.1 {
                    best = (k, v);
                }
            }
        }
    }
    best.0
}

/// Annotates each anomaly with drift rate and stability computed
/// from the measurements inside its extent. Anomalies whose series
/// is too short keep their fields unset.
fn annotate_temporal(anomalies: &mut [SaaAnomaly], measurements: &[FluxMeasurement]) {
    for anomaly in anomalies {
        let half_lon = anomaly.spatial_extent.longitude_span / 2.0;
        let half_lat = anomaly.spatial_extent.latitude_span / 2.0;
        let mut inside: Vec<&FluxMeasurement> = measurements
            .iter()
            .filter(|m| {
                (m.coordinates.longitude - anomaly.center_coordinates.longitude).abs() <= half_lon
                    && (m.coordinates.latitude - anomaly.center_coordinates.latitude).abs()
                        <= half_lat
            })
            .collect();
        inside.sort_by(|a, b| a.epoch.cmp(&b.epoch));

        // one series sample per distinct epoch
        let mut series = Vec::new();
        let mut track = Vec::new();
        for (epoch, group) in &inside.iter().chunk_by(|m| m.epoch) {
            let group: Vec<&&FluxMeasurement> = group.collect();
            let total: f64 = group.iter().map(|m| m.total_flux().value).sum();
            let mean = total / group.len() as f64;
            series.push((epoch, mean));
            let mut weighted = (0.0, 0.0, 0.0, 0.0);
            for m in &group {
                let w = m.total_flux().value.max(1e-12);
                weighted.0 += w * m.coordinates.longitude;
                weighted.1 += w * m.coordinates.latitude;
                weighted.2 += w * m.coordinates.altitude;
                weighted.3 += w;
            }
            if let Ok(center) = crate::coords::GeographicCoordinates::new(
                weighted.0 / weighted.3,
                weighted.1 / weighted.3,
                weighted.2 / weighted.3,
            ) {
                track.push((epoch, center));
            }
        }

        match temporal::analyze_secular_variation(&series) {
            Ok(result) => {
                anomaly.temporal_stability = Some(result.stability);
                anomaly.drift_rate = temporal::drift_rate(&track).ok();
            },
            Err(error) => {
                debug!("anomaly {}: no temporal annotation ({})", anomaly.id, error);
            },
        }
    }
}
