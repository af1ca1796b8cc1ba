use axum::Router;
use rcgen::{CertifiedKey, generate_simple_self_signed};
use secrets_injector::{
    InjectorServer,
    config::{Config, TlsConfig},
};
use std::net::{SocketAddr, TcpListener};
use tempfile::TempDir;

pub(crate) const INIT_CONTAINER_IMAGE: &str = "registry.example.com/secrets-init:1.0.0";

/// A configuration backed by a freshly generated self-signed certificate.
/// The certificate files live as long as the returned `TempDir`.
pub(crate) fn default_test_config() -> (Config, TempDir) {
    // Starting from rustls 0.22, each application must set its default crypto provider.
    // This is done by the `main` function of the binary, which is not called here.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let CertifiedKey { cert, key_pair } =
        generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()])
            .unwrap();

    let certs_dir = tempfile::tempdir().unwrap();
    let cert_file = certs_dir.path().join("tls.crt");
    let key_file = certs_dir.path().join("tls.key");
    std::fs::write(&cert_file, cert.pem()).unwrap();
    std::fs::write(&key_file, key_pair.serialize_pem()).unwrap();

    let config = Config {
        addr: SocketAddr::from(([127, 0, 0, 1], free_port())),
        tls_config: TlsConfig {
            cert_file,
            key_file,
        },
        init_container_image: INIT_CONTAINER_IMAGE.to_owned(),
        log_level: "info".to_owned(),
        log_fmt: "json".to_owned(),
        log_no_color: true,
    };

    (config, certs_dir)
}

pub(crate) async fn app(config: Config) -> Router {
    let server = InjectorServer::new_from_config(config).await.unwrap();

    server.router()
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub(crate) fn admission_review(uid: &str, annotations: serde_json::Value) -> String {
    serde_json::json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": uid,
            "kind": {"group": "", "version": "v1", "kind": "Pod"},
            "resource": {"group": "", "version": "v1", "resource": "pods"},
            "requestKind": {"group": "", "version": "v1", "kind": "Pod"},
            "requestResource": {"group": "", "version": "v1", "resource": "pods"},
            "name": "demo",
            "namespace": "default",
            "operation": "CREATE",
            "userInfo": {"username": "system:serviceaccount:kube-system:replicaset-controller"},
            "object": {
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {"name": "demo", "namespace": "default", "annotations": annotations},
                "spec": {
                    "containers": [{"name": "app", "image": "nginx:1.27"}],
                    "volumes": []
                }
            },
            "oldObject": null,
            "dryRun": false,
            "options": {"apiVersion": "meta.k8s.io/v1", "kind": "CreateOptions"}
        }
    })
    .to_string()
}
