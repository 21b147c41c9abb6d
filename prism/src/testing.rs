//! Test doubles shared by unit tests across modules.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::client::{ModelClient, ModelClientError, PredictRequest};

/// In-process model fleet. Endpoints are healthy unless marked otherwise.
#[derive(Default)]
pub(crate) struct FakeModelClient {
    unhealthy: DashMap<String, ()>,
    failing_predict: Mutex<HashSet<String>>,
    probes: AtomicUsize,
    predictions: Mutex<Vec<(String, PredictRequest)>>,
}

impl FakeModelClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_healthy(&self, endpoint: &str, healthy: bool) {
        if healthy {
            self.unhealthy.remove(endpoint);
        } else {
            self.unhealthy.insert(endpoint.to_string(), ());
        }
    }

    pub(crate) fn fail_predictions_for(&self, endpoint: &str) {
        self.failing_predict
            .lock()
            .unwrap()
            .insert(endpoint.to_string());
    }

    pub(crate) fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub(crate) fn predictions(&self) -> Vec<(String, PredictRequest)> {
        self.predictions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for FakeModelClient {
    async fn probe(&self, endpoint: &str) -> Result<(), ModelClientError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.unhealthy.contains_key(endpoint) {
            Err(ModelClientError::Status {
                url: format!("{endpoint}/status"),
                status: 503,
            })
        } else {
            Ok(())
        }
    }

    async fn predict(
        &self,
        endpoint: &str,
        request: &PredictRequest,
    ) -> Result<(), ModelClientError> {
        if self.failing_predict.lock().unwrap().contains(endpoint) {
            return Err(ModelClientError::Status {
                url: format!("{endpoint}/predict"),
                status: 500,
            });
        }
        self.predictions
            .lock()
            .unwrap()
            .push((endpoint.to_string(), request.clone()));
        Ok(())
    }
}
