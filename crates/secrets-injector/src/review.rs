use axum::http::StatusCode;
use thiserror::Error;
use tracing::{Span, debug, error, info, warn};

use crate::{
    admission_response::AdmissionResponse,
    admission_review::{AdmissionReviewRequest, AdmissionReviewResponse, PodObject},
    patch::PatchBuilder,
};

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("malformed AdmissionReview: {0}")]
    MalformedRequest(String),
}

/// Turns AdmissionReview requests into AdmissionReview responses.
///
/// The handler is stateless apart from the immutable [`PatchBuilder`], it
/// can be shared between any number of concurrent requests.
#[derive(Clone, Debug)]
pub struct ReviewHandler {
    patch_builder: PatchBuilder,
}

impl ReviewHandler {
    pub fn new(patch_builder: PatchBuilder) -> Self {
        Self { patch_builder }
    }

    /// Handle the raw body of an admission request.
    ///
    /// The returned status is always `200 OK`: failures are reported to the
    /// API server as a denial inside of the AdmissionReview.
    pub fn handle(&self, request_body: &[u8]) -> (StatusCode, Vec<u8>) {
        let review = match self.review(request_body) {
            Ok(review) => review,
            Err(e) => {
                let uid = recover_uid(request_body);
                warn!(request_uid = uid.as_str(), error = %e, "rejecting request");
                let span = Span::current();
                span.record("request_uid", uid.as_str());
                span.record("allowed", false);
                AdmissionReviewResponse::new(AdmissionResponse::reject(
                    uid,
                    e.to_string(),
                    StatusCode::BAD_REQUEST.as_u16(),
                ))
            }
        };

        match serde_json::to_vec(&review) {
            Ok(body) => (StatusCode::OK, body),
            Err(e) => {
                error!(error = %e, "cannot serialize AdmissionReview response");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    e.to_string().into_bytes(),
                )
            }
        }
    }

    /// Decode the envelope and decide on the mutation.
    pub fn review(&self, request_body: &[u8]) -> Result<AdmissionReviewResponse, ReviewError> {
        let review: AdmissionReviewRequest = serde_json::from_slice(request_body)
            .map_err(|e| ReviewError::MalformedRequest(e.to_string()))?;
        let request = review
            .request
            .as_ref()
            .ok_or_else(|| ReviewError::MalformedRequest("missing request".to_owned()))?;

        let span = Span::current();
        span.record("request_uid", request.uid.as_str());
        span.record("name", request.name.as_deref().unwrap_or_default());
        span.record("namespace", request.namespace.as_deref().unwrap_or_default());
        span.record("operation", request.operation.as_deref().unwrap_or_default());
        span.record("allowed", true);

        debug!(
            request_uid = request.uid.as_str(),
            name = request.name.as_deref().unwrap_or_default(),
            namespace = request.namespace.as_deref().unwrap_or_default(),
            operation = request.operation.as_deref().unwrap_or_default(),
            "AdmissionReview received"
        );

        if let Some(resource) = request.resource.as_ref().filter(|r| !r.is_pod()) {
            warn!(
                request_uid = request.uid.as_str(),
                resource = resource.resource.as_str(),
                resource_group = resource.group.as_str(),
                resource_version = resource.version.as_str(),
                "not a pod, admitting unchanged"
            );
            return Ok(AdmissionReviewResponse::answering(
                &review,
                AdmissionResponse::allow(request.uid.clone()),
            ));
        }

        let object = request
            .object
            .clone()
            .ok_or_else(|| ReviewError::MalformedRequest("missing request.object".to_owned()))?;
        let pod: PodObject = serde_json::from_value(object).map_err(|e| {
            ReviewError::MalformedRequest(format!("cannot decode request.object: {e}"))
        })?;

        let annotations = pod.metadata.annotations.as_ref();
        info!(
            request_uid = request.uid.as_str(),
            annotations = ?annotations.cloned().unwrap_or_default(),
            "pod annotations"
        );

        let response = AdmissionResponse::allow(request.uid.clone());
        let response = match self
            .patch_builder
            .build_for_pod(annotations, &pod.layout())
        {
            None => {
                span.record("injected", false);
                info!(
                    request_uid = request.uid.as_str(),
                    injected = false,
                    "nothing to inject"
                );
                response
            }
            Some(patch) => match response.clone().with_patch(&patch) {
                Ok(patched) => {
                    span.record("injected", true);
                    info!(
                        request_uid = request.uid.as_str(),
                        injected = true,
                        image = self.patch_builder.init_container_image(),
                        "injecting secrets init container"
                    );
                    patched
                }
                Err(e) => {
                    error!(
                        request_uid = request.uid.as_str(),
                        error = %e,
                        "cannot encode patch, admitting unchanged"
                    );
                    response
                }
            },
        };

        Ok(AdmissionReviewResponse::answering(&review, response))
    }
}

/// Best effort extraction of `request.uid` from a body that could not be
/// decoded as an AdmissionReview.
fn recover_uid(request_body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(request_body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/request/uid")
                .and_then(|uid| uid.as_str())
                .map(str::to_owned)
        })
        .unwrap_or_default()
}
