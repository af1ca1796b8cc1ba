use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize, de::IgnoredAny};

use crate::{admission_response::AdmissionResponse, patch::PodLayout};

pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct GroupVersionResource {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub resource: String,
}

impl GroupVersionResource {
    /// Core `v1` pods.
    pub fn is_pod(&self) -> bool {
        self.group.is_empty() && self.version == "v1" && self.resource == "pods"
    }
}

/// The envelope sent by the API server.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewRequest {
    pub kind: Option<String>,

    pub api_version: Option<String>,

    pub request: Option<AdmissionRequest>,
}

/// The subset of admission/v1/AdmissionRequest the webhook looks at. Any
/// other field sent by the API server is ignored.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    pub resource: Option<GroupVersionResource>,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub operation: Option<String>,
    pub object: Option<serde_json::Value>,
}

/// The parts of the admitted pod that drive the mutation.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodObject {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Option<PodSpecView>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpecView {
    #[serde(default)]
    pub init_containers: Option<Vec<ContainerName>>,
    #[serde(default)]
    pub volumes: Option<Vec<IgnoredAny>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ContainerName {
    #[serde(default)]
    pub name: String,
}

impl PodObject {
    pub fn init_container_names(&self) -> Vec<&str> {
        self.spec
            .iter()
            .flat_map(|spec| spec.init_containers.iter().flatten())
            .map(|container| container.name.as_str())
            .collect()
    }

    pub fn has_volumes(&self) -> bool {
        self.spec
            .as_ref()
            .and_then(|spec| spec.volumes.as_ref())
            .is_some_and(|volumes| !volumes.is_empty())
    }

    pub fn layout(&self) -> PodLayout<'_> {
        PodLayout {
            init_container_names: self.init_container_names(),
            has_volumes: self.has_volumes(),
        }
    }
}

/// The envelope returned to the API server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewResponse {
    pub kind: String,
    pub api_version: String,
    pub response: AdmissionResponse,
}

impl AdmissionReviewResponse {
    pub fn new(response: AdmissionResponse) -> Self {
        AdmissionReviewResponse {
            api_version: ADMISSION_API_VERSION.to_owned(),
            kind: ADMISSION_REVIEW_KIND.to_owned(),
            response,
        }
    }

    /// Build a response using the same `apiVersion` and `kind` of the
    /// request it answers.
    pub fn answering(review: &AdmissionReviewRequest, response: AdmissionResponse) -> Self {
        AdmissionReviewResponse {
            api_version: review
                .api_version
                .clone()
                .unwrap_or_else(|| ADMISSION_API_VERSION.to_owned()),
            kind: review
                .kind
                .clone()
                .unwrap_or_else(|| ADMISSION_REVIEW_KIND.to_owned()),
            response,
        }
    }
}
