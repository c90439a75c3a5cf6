//! Triangulated surface export of one altitude layer of a flux field,
//! for downstream 3D rendering. Field names are a compatibility
//! contract with the visualization layer.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::grid::FluxField;

/// One mesh vertex: geographic position plus the flux scalar there.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshVertex {
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f64,
    pub flux: f64,
}

/// Regular triangulation of one altitude layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifoldMesh {
    pub vertices: Vec<MeshVertex>,
    /// Counter clockwise vertex index triples, two per grid cell
    pub faces: Vec<[u32; 3]>,
    /// Flux per vertex, same order as `vertices`
    pub flux_values: Vec<f64>,
    pub metadata: HashMap<String, String>,
}

impl ManifoldMesh {
    /// Builds the mesh from the altitude layer `k` of a field.
    /// Out of range layers are clamped to the top layer.
    pub fn from_field(field: &FluxField, layer: usize) -> Self {
        let spec = field.spec;
        let (ni, nj, nk) = spec.dimensions();
        let k = layer.min(nk.saturating_sub(1));

        let mut vertices = Vec::with_capacity(ni * nj);
        let mut flux_values = Vec::with_capacity(ni * nj);
        for i in 0..ni {
            for j in 0..nj {
                let p = spec.position(i, j, k);
                let value = field.nodes[spec.flat(i, j, k)].value;
                vertices.push(MeshVertex {
                    longitude: p.longitude,
                    latitude: p.latitude,
                    altitude: p.altitude,
                    flux: value,
                });
                flux_values.push(value);
            }
        }

        let mut faces = Vec::with_capacity(2 * ni.saturating_sub(1) * nj.saturating_sub(1));
        let vertex = |i: usize, j: usize| (i * nj + j) as u32;
        for i in 0..ni.saturating_sub(1) {
            for j in 0..nj.saturating_sub(1) {
                faces.push([vertex(i, j), vertex(i + 1, j), vertex(i + 1, j + 1)]);
                faces.push([vertex(i, j), vertex(i + 1, j + 1), vertex(i, j + 1)]);
            }
        }

        let mut metadata = HashMap::new();
        metadata.insert("layer_altitude_km".to_string(), format!("{:.1}", spec.altitude.node(k)));
        metadata.insert("grid_longitude_nodes".to_string(), ni.to_string());
        metadata.insert("grid_latitude_nodes".to_string(), nj.to_string());
        if field.degraded {
            metadata.insert("degraded".to_string(), "true".to_string());
        }
        Self {
            vertices,
            faces,
            flux_values,
            metadata,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}
