use std::fs;
use std::path::Path;

use tokio_util::sync::CancellationToken;

use api::RenderError;
use render::{Pipeline, Provider, RenderOptions, RenderRequest};

const MODULE: &str = r#"
apiVersion: opmodel.dev/v1
kind: Module
metadata:
  name: my-app
  fqn: opmodel.dev/modules/my-app
  version: 1.0.0
config:
  image: {type: string, default: "nginx:1.25"}
  port: {type: int, default: 8080}
  greeting: {type: string, default: "hello"}
components:
  app:
    labels: {workload-type: stateless}
    resources:
      opmodel.dev/resources/container:
        image: "{{ values.image }}"
        ports:
          - containerPort: "{{ values.port }}"
    traits:
      opmodel.dev/traits/expose:
        port: "{{ values.port }}"
  config:
    labels: {workload-type: config}
    resources:
      opmodel.dev/resources/config:
        data:
          GREETING: "{{ values.greeting }}"
          RELEASE: "{{ release.name }}"
"#;

fn write_module(dir: &Path, body: &str) {
    fs::write(dir.join("module.yaml"), body).unwrap();
}

fn pipeline(strict: bool) -> Pipeline {
    Pipeline::new(
        Provider::builtin(),
        RenderOptions {
            strict,
            ..Default::default()
        },
    )
}

fn request(dir: &Path) -> RenderRequest {
    RenderRequest {
        module_path: dir.to_path_buf(),
        release_name: "my-app".into(),
        namespace: Some("default".into()),
        values_files: Vec::new(),
    }
}

#[tokio::test]
async fn renders_ordered_resources() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), MODULE);
    let result = pipeline(false)
        .render(&request(dir.path()), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.ok(), "{:?}", result.errors);
    let kinds: Vec<_> = result.resources.iter().map(|r| r.kind()).collect();
    // ConfigMap (15) < Service (50) < Deployment (100).
    assert_eq!(kinds, vec!["ConfigMap", "Service", "Deployment"]);
    for w in result.resources.windows(2) {
        assert!(w[0].sort_key() <= w[1].sort_key());
    }
}

#[tokio::test]
async fn render_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), MODULE);
    let p = pipeline(false);
    let token = CancellationToken::new();
    let a = p.render(&request(dir.path()), &token).await.unwrap();
    let b = p.render(&request(dir.path()), &token).await.unwrap();
    assert_eq!(
        render::pipeline::to_yaml(&a).unwrap(),
        render::pipeline::to_yaml(&b).unwrap()
    );
}

#[tokio::test]
async fn tracking_labels_are_injected() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), MODULE);
    let result = pipeline(false)
        .render(&request(dir.path()), &CancellationToken::new())
        .await
        .unwrap();

    for r in &result.resources {
        let labels = r.object.pointer("/metadata/labels").unwrap();
        assert_eq!(labels["app.kubernetes.io/managed-by"], "opm");
        assert_eq!(labels["module-release.opmodel.dev/name"], "my-app");
        assert_eq!(labels["module-release.opmodel.dev/namespace"], "default");
        assert_eq!(
            labels["module-release.opmodel.dev/uuid"],
            result.release.uuid.to_string().as_str()
        );
        assert_eq!(labels["module.opmodel.dev/name"], "my-app");
        assert_eq!(labels["module.opmodel.dev/version"], "1.0.0");
        assert!(labels.get("component.opmodel.dev/name").is_some());
    }
}

#[tokio::test]
async fn values_flow_into_resources() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), MODULE);
    let overlay = dir.path().join("prod.yaml");
    fs::write(&overlay, "image: nginx:1.27\nport: 9090\n").unwrap();
    let mut req = request(dir.path());
    req.values_files.push(overlay);
    let result = pipeline(false)
        .render(&req, &CancellationToken::new())
        .await
        .unwrap();

    let deploy = result.resources.iter().find(|r| r.kind() == "Deployment").unwrap();
    assert_eq!(
        deploy.object.pointer("/spec/template/spec/containers/0/image").unwrap(),
        "nginx:1.27"
    );
    let svc = result.resources.iter().find(|r| r.kind() == "Service").unwrap();
    assert_eq!(svc.object.pointer("/spec/ports/0/port").unwrap(), 9090);
}

#[tokio::test]
async fn unmatched_component_collects_error() {
    let dir = tempfile::tempdir().unwrap();
    write_module(
        dir.path(),
        r#"
metadata:
  name: odd
  fqn: opmodel.dev/modules/odd
  version: 0.1.0
components:
  mystery:
    labels: {workload-type: exotic}
    resources:
      opmodel.dev/resources/unknown: {x: 1}
  app:
    labels: {workload-type: stateless}
    resources:
      opmodel.dev/resources/container: {image: nginx}
"#,
    );
    let result = pipeline(false)
        .render(&request(dir.path()), &CancellationToken::new())
        .await
        .unwrap();

    let err = result
        .errors
        .iter()
        .find_map(|e| match e {
            RenderError::UnmatchedComponent { component, available } => {
                Some((component.clone(), available.clone()))
            }
            _ => None,
        })
        .expect("an unmatched-component error");
    assert_eq!(err.0, "mystery");
    assert!(err.1.contains(&"opmodel.dev/transformers/deployment".to_string()));
    // The other component still rendered: fail on end.
    assert!(result.resources.iter().any(|r| r.kind() == "Deployment"));
}

#[tokio::test]
async fn strict_mode_promotes_unhandled_traits() {
    let dir = tempfile::tempdir().unwrap();
    write_module(
        dir.path(),
        r#"
metadata:
  name: t
  fqn: opmodel.dev/modules/t
  version: 0.1.0
components:
  app:
    labels: {workload-type: stateless}
    resources:
      opmodel.dev/resources/container: {image: nginx}
    traits:
      opmodel.dev/traits/exotic: {x: 1}
"#,
    );
    let lax = pipeline(false)
        .render(&request(dir.path()), &CancellationToken::new())
        .await
        .unwrap();
    assert!(lax.ok());
    assert!(lax.warnings.iter().any(|w| w.contains("opmodel.dev/traits/exotic")));

    let strict = pipeline(true)
        .render(&request(dir.path()), &CancellationToken::new())
        .await
        .unwrap();
    assert!(strict.errors.iter().any(|e| matches!(
        e,
        RenderError::UnhandledTrait { trait_fqn, .. } if trait_fqn == "opmodel.dev/traits/exotic"
    )));
}

#[tokio::test]
async fn cancellation_is_not_a_render_error() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), MODULE);
    let token = CancellationToken::new();
    token.cancel();
    let err = pipeline(false)
        .render(&request(dir.path()), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, render::Error::Cancelled));
}

#[tokio::test]
async fn multi_resource_map_output() {
    let dir = tempfile::tempdir().unwrap();
    write_module(
        dir.path(),
        r#"
metadata:
  name: vols
  fqn: opmodel.dev/modules/vols
  version: 0.1.0
components:
  data:
    annotations:
      transformer.opmodel.dev/list-output: "true"
    traits:
      opmodel.dev/traits/volume:
        volumes:
          - {name: movies, size: 10Gi}
          - {name: shows, size: 5Gi}
"#,
    );
    let result = pipeline(false)
        .render(&request(dir.path()), &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.ok(), "{:?}", result.errors);
    let pvcs: Vec<_> = result
        .resources
        .iter()
        .filter(|r| r.kind() == "PersistentVolumeClaim")
        .map(|r| r.name().to_string())
        .collect();
    assert_eq!(pvcs, vec!["data-movies", "data-shows"]);
}
