use bytes::Bytes;
use luddite::{Pipeline, Response, Service, ServiceConfig};
use tempfile::TempDir;

fn pipeline(root_redirect: bool) -> (TempDir, Pipeline) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("widgets-v1.json"), br#"{"version":1}"#).unwrap();
    std::fs::write(dir.path().join("widgets-v2.json"), br#"{"version":2}"#).unwrap();

    let mut config = ServiceConfig::default();
    config.version.max = 2;
    config.schema.enabled = true;
    config.schema.uri_path = "/schema/".into();
    config.schema.file_path = dir.path().to_path_buf();
    config.schema.file_pattern = "widgets-v%d.json".into();
    config.schema.root_redirect = root_redirect;

    let mut service = Service::new(config).unwrap();
    (dir, service.seal().unwrap())
}

async fn get(pipeline: &Pipeline, uri: &str) -> Response {
    let req = http::Request::get(uri).body(Bytes::new()).unwrap();
    pipeline.call(req.into()).await
}

#[tokio::test]
async fn serves_schema_files_by_version() {
    let (_dir, p) = pipeline(false);

    let res = get(&p, "/schema/v1").await;
    assert_eq!(res.status_code(), 200);
    assert_eq!(res.header("content-type"), Some("application/json"));
    assert_eq!(res.body(), br#"{"version":1}"#);

    assert_eq!(get(&p, "/schema/v2").await.body(), br#"{"version":2}"#);
    assert_eq!(get(&p, "/schema/v3").await.status_code(), 404);
    assert_eq!(get(&p, "/schema/../secret").await.status_code(), 404);
}

#[tokio::test]
async fn bare_schema_uri_redirects_to_the_newest_version() {
    let (_dir, p) = pipeline(false);

    let res = get(&p, "/schema").await;
    assert_eq!(res.status_code(), 307);
    assert_eq!(res.header("location"), Some("/schema/v2"));

    assert_eq!(get(&p, "/").await.status_code(), 404);
}

#[tokio::test]
async fn root_redirect_is_optional() {
    let (_dir, p) = pipeline(true);

    let res = get(&p, "/").await;
    assert_eq!(res.status_code(), 307);
    assert_eq!(res.header("location"), Some("/schema"));
}
