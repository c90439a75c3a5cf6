//! Kernel factorization cache shared across concurrent analysis runs.
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use log::{debug, trace};
use nalgebra::DMatrix;

use super::SamplePoint;

/// Fingerprint of a point set: positions are sorted first so the
/// key does not depend on ingestion order.
pub fn fingerprint(points: &[SamplePoint]) -> u64 {
    let mut keys: Vec<(u64, u64, u64)> = points
        .iter()
        .map(|p| {
            (
                p.coordinates.longitude.to_bits(),
                p.coordinates.latitude.to_bits(),
                p.coordinates.altitude.to_bits(),
            )
        })
        .collect();
    keys.sort_unstable();
    let mut hasher = DefaultHasher::new();
    keys.hash(&mut hasher);
    hasher.finish()
}

type Slot = Arc<Mutex<Option<Arc<DMatrix<f64>>>>>;

/// Caches inverted RBF Gram matrices keyed by point set fingerprint.
/// At most one factorization runs concurrently per fingerprint:
/// requests racing on the same key wait on the slot and reuse the
/// first result instead of recomputing it.
#[derive(Debug, Default)]
pub struct FactorizationCache {
    slots: Mutex<HashMap<u64, Slot>>,
}

impl FactorizationCache {
    pub fn new() -> Self {
        Self::default()
    }
    /// Returns the cached inverse for `key`, or runs `factorize`
    /// while holding this key's slot. A `None` from `factorize`
    /// (singular matrix) is not cached, so a later better
    /// conditioned set may still succeed.
    pub fn get_or_factorize<F: FnOnce() -> Option<DMatrix<f64>>>(
        &self,
        key: u64,
        factorize: F,
    ) -> Option<Arc<DMatrix<f64>>> {
        let slot = {
            let mut slots = self.slots.lock().unwrap();
            slots.entry(key).or_default().clone()
        };
        // per-key lock: serializes the expensive factorization
        let mut guard = slot.lock().unwrap();
        if let Some(cached) = guard.as_ref() {
            trace!("factorization cache hit (key {:#x})", key);
            return Some(cached.clone());
        }
        debug!("factorizing kernel matrix (key {:#x})", key);
        let inverse = factorize().map(Arc::new);
        if let Some(a) = &inverse {
            *guard = Some(a.clone());
        }
        inverse
    }
    /// Number of cached factorizations.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.lock().unwrap().is_some())
            .count()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::coords::GeographicCoordinates;
    use crate::flux::FluxIntensity;

    fn point(lon: f64, lat: f64) -> SamplePoint {
        SamplePoint {
            coordinates: GeographicCoordinates::new(lon, lat, 500.0).unwrap(),
            electron: FluxIntensity::new(100.0, 5.0).unwrap(),
            proton: FluxIntensity::new(50.0, 5.0).unwrap(),
        }
    }

    #[test]
    fn fingerprint_ignores_order() {
        let a = vec![point(-45.0, -20.0), point(-44.0, -21.0)];
        let b = vec![point(-44.0, -21.0), point(-45.0, -20.0)];
        assert_eq!(fingerprint(&a), fingerprint(&b));
        let c = vec![point(-44.0, -21.0), point(-45.0, -19.0)];
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }
    #[test]
    fn factorizes_once_per_key() {
        let cache = FactorizationCache::new();
        let mut calls = 0;
        let first = cache.get_or_factorize(42, || {
            calls += 1;
            Some(DMatrix::identity(2, 2))
        });
        assert!(first.is_some());
        let second = cache.get_or_factorize(42, || {
            calls += 1;
            Some(DMatrix::identity(2, 2))
        });
        assert!(second.is_some());
        assert_eq!(calls, 1);
        assert_eq!(cache.len(), 1);
    }
    #[test]
    fn singular_results_not_cached() {
        let cache = FactorizationCache::new();
        let miss = cache.get_or_factorize(7, || None);
        assert!(miss.is_none());
        assert!(cache.is_empty());
        let hit = cache.get_or_factorize(7, || Some(DMatrix::identity(2, 2)));
        assert!(hit.is_some());
    }
}
