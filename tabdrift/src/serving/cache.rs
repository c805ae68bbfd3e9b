//! Model cache for single-row scoring.
//!
//! Entries are loaded through an injected function on first use and stay
//! cached for the lifetime of the cache.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::data::{FeatureFrame, StoreError};
use crate::model::{FittedPipeline, ModelError};

/// One scored row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub proba: f64,
    pub latency_ms: f64,
}

/// Fitted pipelines keyed by model identifier.
pub struct ModelCache<L> {
    loader: L,
    models: RwLock<HashMap<String, Arc<FittedPipeline>>>,
}

impl<L> ModelCache<L>
where
    L: Fn(&str) -> Result<FittedPipeline, ModelError>,
{
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Cached pipeline for `id`, loading it on first miss.
    ///
    /// A failed load is not cached.
    pub fn get(&self, id: &str) -> Result<Arc<FittedPipeline>, ModelError> {
        if let Some(model) = self.read_entry(id) {
            return Ok(model);
        }

        let loaded = Arc::new((self.loader)(id)?);
        info!("Loaded model {} ({})", id, loaded.kind);

        let mut models = self
            .models
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(Arc::clone(models.entry(id.to_string()).or_insert(loaded)))
    }

    fn read_entry(&self, id: &str) -> Option<Arc<FittedPipeline>> {
        let models = self
            .models
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        models.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.models
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Score one named feature row with model `id`.
    ///
    /// Latency covers the prediction only, not the first-time load.
    pub fn predict_one(
        &self,
        id: &str,
        row: &HashMap<String, Value>,
    ) -> Result<Prediction, ModelError> {
        let model = self.get(id)?;
        let frame = FeatureFrame::from_row(&model.schema, row)?;

        let start = Instant::now();
        let proba = model
            .predict_proba(&frame)?
            .first()
            .copied()
            .ok_or_else(|| StoreError::InvalidData("model returned no prediction".to_string()))?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        debug!("Model {} scored row: proba = {:.4}", id, proba);
        Ok(Prediction { proba, latency_ms })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::data::FeatureColumn;
    use crate::model::{Classifier, ModelKind, ModelParams, PipelineFactory};

    fn fitted() -> FittedPipeline {
        let values: Vec<Option<f64>> = (0..20).map(|i| Some(i as f64)).collect();
        let labels: Vec<u8> = (0..20).map(|i| u8::from(i >= 10)).collect();
        let frame = FeatureFrame::from_columns(
            20,
            vec![("trip_distance".to_string(), FeatureColumn::Numeric(values))],
        )
        .unwrap();
        let mut pipeline = PipelineFactory::new(ModelKind::Logreg, ModelParams::default())
            .pipeline(&frame.schema(), 42);
        pipeline.fit(&frame, &labels).unwrap();
        pipeline.into_fitted().unwrap()
    }

    #[test]
    fn test_loads_once_per_id() {
        let calls = AtomicUsize::new(0);
        let model = fitted();
        let cache = ModelCache::new(|_id: &str| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(model.clone())
        });

        assert!(cache.is_empty());
        let a = cache.get("logreg").unwrap();
        let b = cache.get("logreg").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.get("gbdt").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_load_is_not_cached() {
        let cache = ModelCache::new(|id: &str| Err(ModelError::UnknownModel(id.to_string())));
        assert!(cache.get("xgb").is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_predict_one() {
        let model = fitted();
        let cache = ModelCache::new(|_id: &str| Ok(model.clone()));

        let high: HashMap<String, Value> =
            [("trip_distance".to_string(), Value::from(19.0))].into_iter().collect();
        let low: HashMap<String, Value> =
            [("trip_distance".to_string(), Value::from(0.0))].into_iter().collect();

        let p_high = cache.predict_one("logreg", &high).unwrap();
        let p_low = cache.predict_one("logreg", &low).unwrap();
        assert!(p_high.proba > 0.5);
        assert!(p_low.proba < 0.5);
        assert!(p_high.latency_ms >= 0.0);
    }

    #[test]
    fn test_predict_rejects_bad_value() {
        let model = fitted();
        let cache = ModelCache::new(|_id: &str| Ok(model.clone()));
        let row: HashMap<String, Value> =
            [("trip_distance".to_string(), Value::from("far"))].into_iter().collect();
        assert!(matches!(
            cache.predict_one("logreg", &row),
            Err(ModelError::InvalidInput(_))
        ));
    }
}
