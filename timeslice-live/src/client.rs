//! HTTP client for the prediction endpoint.

use std::path::{Path, PathBuf};

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use timeslice_core::{prediction_file_name, ReplayConfig, SliceError};

use crate::error::PredictionError;

/// Result of submitting one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Prediction written to the given path.
    Stored(PathBuf),
    /// Endpoint rejected the request or could not be reached.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct PredictionClient {
    http: reqwest::Client,
    endpoint: String,
}

impl PredictionClient {
    pub fn new(config: &ReplayConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST a bundle and return the response body. Only `200 OK` succeeds.
    pub async fn predict(&self, payload: String) -> Result<String, PredictionError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(PredictionError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    /// Submit a snapshot and store the prediction next to it in `slice_dir`.
    ///
    /// Endpoint failures are logged and reported as [`Submission::Skipped`];
    /// only a failure to write the prediction file is an error.
    pub async fn submit(
        &self,
        patient_id: &str,
        payload: String,
        slice_dir: &Path,
    ) -> Result<Submission, SliceError> {
        tracing::info!(
            endpoint = %self.endpoint,
            patient = patient_id,
            "Sending observation bundle"
        );

        let body = match self.predict(payload).await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    patient = patient_id,
                    error = %err,
                    "Prediction request failed, skipping"
                );
                return Ok(Submission::Skipped);
            }
        };

        let path = slice_dir.join(prediction_file_name(patient_id));
        tokio::fs::write(&path, body)
            .await
            .map_err(|err| SliceError::io(&path, err))?;

        tracing::info!(patient = patient_id, path = %path.display(), "Stored prediction");
        Ok(Submission::Stored(path))
    }
}
