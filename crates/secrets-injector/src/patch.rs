use std::collections::BTreeMap;

use json_patch::{AddOperation, Patch, PatchOperation, jsonptr::PointerBuf};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, ObjectFieldSelector,
    ResourceRequirements, Volume, VolumeMount,
};

/// Annotation that opts a pod into the secrets injection.
pub const ANNOTATION_INJECTOR_WEBHOOK: &str = "secrets.k8s.aws/sidecarInjectorWebhook";
/// Annotation holding the ARN of the secret the init container fetches.
pub const ANNOTATION_SECRET_ARN: &str = "secrets.k8s.aws/secret-arn";

pub const INIT_CONTAINER_NAME: &str = "secrets-init-container";
pub const SECRET_VOLUME_NAME: &str = "secret-vol";
pub const SECRET_MOUNT_PATH: &str = "/tmp";
pub const SECRET_ARN_ENV_VAR: &str = "SECRET_ARN";

/// Builds the JSON Patch that adds the secrets init container, together
/// with its in-memory volume, to a pod.
///
/// The builder is immutable once created: the only input besides the pod
/// annotations is the image of the init container, which comes from the
/// process configuration.
#[derive(Clone, Debug)]
pub struct PatchBuilder {
    init_container_image: String,
}

impl PatchBuilder {
    pub fn new(init_container_image: impl Into<String>) -> Self {
        Self {
            init_container_image: init_container_image.into(),
        }
    }

    pub fn init_container_image(&self) -> &str {
        &self.init_container_image
    }

    /// Returns the patch to apply to a pod carrying the given annotations,
    /// or `None` when the pod must be admitted unchanged.
    ///
    /// The pod is assumed to have an empty spec: no init containers and no
    /// volumes.
    pub fn build(&self, annotations: Option<&BTreeMap<String, String>>) -> Option<Patch> {
        self.build_for_pod(annotations, &PodLayout::default())
    }

    /// Same as [`PatchBuilder::build`], taking into account the init
    /// containers and the volumes already declared by the pod.
    ///
    /// Existing init containers and volumes are preserved: the secrets init
    /// container and its volume are appended to them instead of replacing
    /// the whole lists. Pods that already run the secrets init container are
    /// left untouched.
    pub fn build_for_pod(
        &self,
        annotations: Option<&BTreeMap<String, String>>,
        layout: &PodLayout<'_>,
    ) -> Option<Patch> {
        if !requires_injection(annotations) {
            return None;
        }
        if layout.init_container_names.contains(&INIT_CONTAINER_NAME) {
            return None;
        }

        let add_init_container = add_to_list(
            "initContainers",
            layout.init_container_names.is_empty(),
            serde_json::json!(self.init_container()),
        );
        let add_volume = add_to_list(
            "volumes",
            !layout.has_volumes,
            serde_json::json!(secret_volume()),
        );

        Some(Patch(vec![
            PatchOperation::Add(add_init_container),
            PatchOperation::Add(add_volume),
        ]))
    }

    fn init_container(&self) -> Container {
        Container {
            image: Some(self.init_container_image.clone()),
            name: INIT_CONTAINER_NAME.to_owned(),
            volume_mounts: Some(vec![VolumeMount {
                name: SECRET_VOLUME_NAME.to_owned(),
                mount_path: SECRET_MOUNT_PATH.to_owned(),
                ..Default::default()
            }]),
            env: Some(vec![EnvVar {
                name: SECRET_ARN_ENV_VAR.to_owned(),
                // resolved by the kubelet from the pod's own metadata
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        field_path: format!("metadata.annotations['{ANNOTATION_SECRET_ARN}']"),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            resources: Some(ResourceRequirements::default()),
            ..Default::default()
        }
    }
}

/// The parts of the pod spec that decide the paths of the patch
/// operations.
#[derive(Clone, Debug, Default)]
pub struct PodLayout<'a> {
    pub init_container_names: Vec<&'a str>,
    pub has_volumes: bool,
}

// Appending with `/-` requires the target array to exist: an empty or
// missing list is set as a whole.
fn add_to_list(field: &str, create_list: bool, item: serde_json::Value) -> AddOperation {
    if create_list {
        AddOperation {
            path: PointerBuf::from_tokens(["spec", field]),
            value: serde_json::Value::Array(vec![item]),
        }
    } else {
        AddOperation {
            path: PointerBuf::from_tokens(["spec", field, "-"]),
            value: item,
        }
    }
}

fn secret_volume() -> Volume {
    Volume {
        name: SECRET_VOLUME_NAME.to_owned(),
        empty_dir: Some(EmptyDirVolumeSource {
            medium: Some("Memory".to_owned()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A pod requires the injection only when both the opt-in annotation and
/// the secret ARN annotation are set. Annotation values are not inspected.
pub fn requires_injection(annotations: Option<&BTreeMap<String, String>>) -> bool {
    annotations.is_some_and(|annotations| {
        annotations.contains_key(ANNOTATION_INJECTOR_WEBHOOK)
            && annotations.contains_key(ANNOTATION_SECRET_ARN)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::*;
    use serde_json::json;

    const IMAGE: &str = "registry.example.com/secrets-init:1.0.0";
    const ARN: &str = "arn:aws:secretsmanager:us-east-1:123456789012:secret:database-password-hlRvvF";

    fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn expected_init_container() -> serde_json::Value {
        json!({
            "env": [{
                "name": "SECRET_ARN",
                "valueFrom": {
                    "fieldRef": {
                        "fieldPath": "metadata.annotations['secrets.k8s.aws/secret-arn']"
                    }
                }
            }],
            "image": IMAGE,
            "name": "secrets-init-container",
            "resources": {},
            "volumeMounts": [{"mountPath": "/tmp", "name": "secret-vol"}]
        })
    }

    #[rstest]
    #[case::no_annotations(None)]
    #[case::empty(Some(annotations(&[])))]
    #[case::only_webhook(Some(annotations(&[(ANNOTATION_INJECTOR_WEBHOOK, "enabled")])))]
    #[case::only_secret_arn(Some(annotations(&[(ANNOTATION_SECRET_ARN, ARN)])))]
    #[case::wrong_case(Some(annotations(&[
        ("secrets.k8s.aws/SidecarInjectorWebhook", "enabled"),
        (ANNOTATION_SECRET_ARN, ARN),
    ])))]
    #[case::unrelated(Some(annotations(&[("app.kubernetes.io/name", "nginx")])))]
    fn no_patch_without_both_annotations(#[case] annotations: Option<BTreeMap<String, String>>) {
        let builder = PatchBuilder::new(IMAGE);
        assert!(builder.build(annotations.as_ref()).is_none());
    }

    #[test]
    fn secret_arn_alone_does_not_trigger_injection() {
        // the opt-in annotation is mandatory, a secret ARN alone is ignored
        let only_arn = annotations(&[(ANNOTATION_SECRET_ARN, ARN)]);
        assert!(!requires_injection(Some(&only_arn)));
        assert!(PatchBuilder::new(IMAGE).build(Some(&only_arn)).is_none());
    }

    #[rstest]
    #[case::enabled("enabled")]
    #[case::empty_value("")]
    #[case::disabled("disabled")]
    fn injection_depends_on_presence_only(#[case] webhook_value: &str) {
        let annotations = annotations(&[
            (ANNOTATION_INJECTOR_WEBHOOK, webhook_value),
            (ANNOTATION_SECRET_ARN, ARN),
        ]);
        assert!(requires_injection(Some(&annotations)));
    }

    fn expected_volume() -> serde_json::Value {
        json!({"emptyDir": {"medium": "Memory"}, "name": "secret-vol"})
    }

    #[test]
    fn patch_operations_and_order() {
        let annotations = annotations(&[
            (ANNOTATION_INJECTOR_WEBHOOK, "enabled"),
            (ANNOTATION_SECRET_ARN, ARN),
        ]);
        let patch = PatchBuilder::new(IMAGE)
            .build(Some(&annotations))
            .expect("a patch should be produced");

        let expected = json!([
            {
                "op": "add",
                "path": "/spec/initContainers",
                "value": [expected_init_container()]
            },
            {
                "op": "add",
                "path": "/spec/volumes",
                "value": [expected_volume()]
            }
        ]);
        assert_eq!(serde_json::to_value(&patch).unwrap(), expected);
    }

    #[test]
    fn volume_is_appended_to_existing_volumes() {
        let annotations = annotations(&[
            (ANNOTATION_INJECTOR_WEBHOOK, "enabled"),
            (ANNOTATION_SECRET_ARN, ARN),
        ]);
        let layout = PodLayout {
            init_container_names: vec![],
            has_volumes: true,
        };
        let patch = PatchBuilder::new(IMAGE)
            .build_for_pod(Some(&annotations), &layout)
            .unwrap();

        let expected = json!([
            {
                "op": "add",
                "path": "/spec/initContainers",
                "value": [expected_init_container()]
            },
            {
                "op": "add",
                "path": "/spec/volumes/-",
                "value": expected_volume()
            }
        ]);
        assert_eq!(serde_json::to_value(&patch).unwrap(), expected);
    }

    #[rstest]
    #[case::empty_spec(json!({"spec": {}}))]
    #[case::no_volumes_key(json!({
        "spec": {
            "automountServiceAccountToken": false,
            "containers": [{"name": "app", "image": "app:1"}]
        }
    }))]
    fn apply_to_pod_without_volumes(#[case] pod: serde_json::Value) {
        let annotations = annotations(&[
            (ANNOTATION_INJECTOR_WEBHOOK, "enabled"),
            (ANNOTATION_SECRET_ARN, ARN),
        ]);
        let patch = PatchBuilder::new(IMAGE).build(Some(&annotations)).unwrap();

        let mut pod = pod;
        json_patch::patch(&mut pod, &patch.0).unwrap();

        assert_eq!(pod["spec"]["initContainers"], json!([expected_init_container()]));
        assert_eq!(pod["spec"]["volumes"], json!([expected_volume()]));
    }

    #[test]
    fn secret_arn_is_never_copied_into_the_patch() {
        let annotations = annotations(&[
            (ANNOTATION_INJECTOR_WEBHOOK, "enabled"),
            (ANNOTATION_SECRET_ARN, ARN),
        ]);
        let patch = PatchBuilder::new(IMAGE).build(Some(&annotations)).unwrap();
        let encoded = serde_json::to_string(&patch).unwrap();
        assert!(!encoded.contains(ARN));
    }

    #[test]
    fn patch_is_deterministic() {
        let annotations = annotations(&[
            (ANNOTATION_INJECTOR_WEBHOOK, "enabled"),
            (ANNOTATION_SECRET_ARN, ARN),
        ]);
        let builder = PatchBuilder::new(IMAGE);
        let first = serde_json::to_vec(&builder.build(Some(&annotations))).unwrap();
        let second = serde_json::to_vec(&builder.build(Some(&annotations))).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn existing_init_containers_are_preserved() {
        let annotations = annotations(&[
            (ANNOTATION_INJECTOR_WEBHOOK, "enabled"),
            (ANNOTATION_SECRET_ARN, ARN),
        ]);
        let layout = PodLayout {
            init_container_names: vec!["migrations"],
            has_volumes: false,
        };
        let patch = PatchBuilder::new(IMAGE)
            .build_for_pod(Some(&annotations), &layout)
            .unwrap();

        let mut pod = json!({
            "spec": {
                "initContainers": [{"name": "migrations", "image": "migrations:1"}],
                "containers": [{"name": "app", "image": "app:1"}],
                "volumes": []
            }
        });
        json_patch::patch(&mut pod, &patch.0).unwrap();

        let init_containers = pod["spec"]["initContainers"].as_array().unwrap();
        assert_eq!(init_containers.len(), 2);
        assert_eq!(init_containers[0]["name"], "migrations");
        assert_eq!(init_containers[1], expected_init_container());
    }

    #[test]
    fn already_injected_pod_is_left_untouched() {
        let annotations = annotations(&[
            (ANNOTATION_INJECTOR_WEBHOOK, "enabled"),
            (ANNOTATION_SECRET_ARN, ARN),
        ]);
        let layout = PodLayout {
            init_container_names: vec!["migrations", INIT_CONTAINER_NAME],
            has_volumes: true,
        };
        let patch = PatchBuilder::new(IMAGE).build_for_pod(Some(&annotations), &layout);
        assert!(patch.is_none());
    }

    #[test]
    fn apply_to_pod_without_init_containers() {
        let annotations = annotations(&[
            (ANNOTATION_INJECTOR_WEBHOOK, "enabled"),
            (ANNOTATION_SECRET_ARN, ARN),
        ]);
        let layout = PodLayout {
            init_container_names: vec![],
            has_volumes: true,
        };
        let patch = PatchBuilder::new(IMAGE)
            .build_for_pod(Some(&annotations), &layout)
            .unwrap();

        let mut pod = json!({
            "spec": {
                "containers": [{"name": "app", "image": "app:1"}],
                "volumes": [{"name": "existing-volume", "emptyDir": {}}]
            }
        });
        json_patch::patch(&mut pod, &patch.0).unwrap();

        let init_containers = pod["spec"]["initContainers"].as_array().unwrap();
        assert_eq!(init_containers.len(), 1);
        assert_eq!(init_containers[0]["name"], INIT_CONTAINER_NAME);
        assert_eq!(init_containers[0]["image"], IMAGE);

        let volumes = pod["spec"]["volumes"].as_array().unwrap();
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0]["name"], "existing-volume");
        assert_eq!(volumes[1]["name"], SECRET_VOLUME_NAME);
        assert_eq!(volumes[1]["emptyDir"]["medium"], "Memory");
    }
}
