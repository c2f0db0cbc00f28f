use flate2::{write::GzEncoder, Compression};
use minibox::{
    errors::{LayerFailure, ManifestError, PipelineError},
    filesystem::{RootBuilder, SandboxRoot},
    manifest::media_types,
    registry::{parse_url, Client, DefaultRegistry},
    ImageName, ScratchDir,
};
use reqwest::StatusCode;
use serde_json::json;
use std::{fs, io::Write, path::Path, time::Duration};
use tempfile::TempDir;
use tokio::runtime::Runtime;
use wiremock::{
    matchers::{header, method, path, path_regex, query_param},
    Mock, MockServer, ResponseTemplate,
};

const TOKEN: &str = "t0ken";

fn digest(fill: char) -> String {
    format!("sha256:{}", fill.to_string().repeat(64))
}

fn layer(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, content.as_bytes())
            .unwrap();
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&builder.into_inner().unwrap()).unwrap();
    encoder.finish().unwrap()
}

fn manifest(digests: &[&str]) -> String {
    let layers: Vec<_> = digests
        .iter()
        .map(|digest| {
            json!({
                "mediaType": media_types::LAYER_TAR_GZIP,
                "size": 1024,
                "digest": digest,
            })
        })
        .collect();
    json!({
        "schemaVersion": 2,
        "mediaType": media_types::MANIFEST,
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": 1470,
            "digest": digest('c'),
        },
        "layers": layers,
    })
    .to_string()
}

fn registry_for(server: &MockServer) -> DefaultRegistry {
    DefaultRegistry {
        registry_url: parse_url(&server.uri()).unwrap(),
        token_url: Some(parse_url(&format!("{}/token", server.uri())).unwrap()),
        service: Some("test-registry".to_owned()),
        library_prefix: Some("library".parse().unwrap()),
    }
}

fn client_for(server: &MockServer, downloads: usize) -> Client {
    Client::builder()
        .registry(&registry_for(server))
        .request_timeout(Duration::from_secs(10))
        .max_concurrent_downloads(downloads)
        .build()
        .unwrap()
}

async fn mock_token(server: &MockServer, repository: &str) {
    Mock::given(method("GET"))
        .and(path("/token"))
        .and(query_param("service", "test-registry"))
        .and(query_param("scope", format!("repository:{}:pull", repository)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"token": TOKEN, "expires_in": 300})),
        )
        .expect(1)
        .mount(server)
        .await;
}

async fn mock_manifest(server: &MockServer, repository: &str, tag: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/manifests/{}", repository, tag)))
        .and(header("accept", media_types::MANIFEST))
        .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, media_types::MANIFEST))
        .expect(1)
        .mount(server)
        .await;
}

async fn mock_blob(server: &MockServer, repository: &str, digest: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/blobs/{}", repository, digest)))
        .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
        .respond_with(response)
        .mount(server)
        .await;
}

fn leftover_archives(root: &Path) -> Vec<String> {
    fs::read_dir(root)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".minibox-layer-"))
        .collect()
}

async fn pull(client: &Client, image: &str, base: &TempDir) -> Result<SandboxRoot, PipelineError> {
    let image: ImageName = image.parse().unwrap();
    client
        .pull(&image, ScratchDir::new_in(base.path()).unwrap())
        .await
}

#[test]
fn later_layer_wins_even_when_downloaded_first() {
    let _ = env_logger::builder().is_test(true).try_init();
    Runtime::new().unwrap().block_on(async {
        let server = MockServer::start().await;
        let (first, second) = (digest('1'), digest('2'));
        mock_token(&server, "library/hello").await;
        mock_manifest(&server, "library/hello", "latest", manifest(&[&first, &second])).await;
        mock_blob(
            &server,
            "library/hello",
            &first,
            ResponseTemplate::new(200)
                .set_body_bytes(layer(&[("etc/motd", "first"), ("etc/only-first", "1")]))
                .set_delay(Duration::from_millis(500)),
        )
        .await;
        mock_blob(
            &server,
            "library/hello",
            &second,
            ResponseTemplate::new(200).set_body_bytes(layer(&[("etc/motd", "second")])),
        )
        .await;

        let base = TempDir::new().unwrap();
        let root = pull(&client_for(&server, 3), "hello", &base).await.unwrap();
        assert!(root.is_complete());
        assert_eq!(root.applied(), 2);
        assert!(root.validate().is_ok());
        assert_eq!(
            fs::read_to_string(root.path().join("etc/motd")).unwrap(),
            "second"
        );
        assert_eq!(
            fs::read_to_string(root.path().join("etc/only-first")).unwrap(),
            "1"
        );
        assert!(leftover_archives(root.path()).is_empty());
    })
}

#[test]
fn sequential_downloads_keep_order() {
    let _ = env_logger::builder().is_test(true).try_init();
    Runtime::new().unwrap().block_on(async {
        let server = MockServer::start().await;
        let (first, second) = (digest('3'), digest('4'));
        mock_token(&server, "someone/tool").await;
        mock_manifest(&server, "someone/tool", "1.0", manifest(&[&first, &second])).await;
        mock_blob(
            &server,
            "someone/tool",
            &first,
            ResponseTemplate::new(200).set_body_bytes(layer(&[("bin/tool", "old")])),
        )
        .await;
        mock_blob(
            &server,
            "someone/tool",
            &second,
            ResponseTemplate::new(200).set_body_bytes(layer(&[("bin/tool", "new")])),
        )
        .await;

        let base = TempDir::new().unwrap();
        let root = pull(&client_for(&server, 1), "someone/tool:1.0", &base)
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(root.path().join("bin/tool")).unwrap(), "new");
        assert!(leftover_archives(root.path()).is_empty());
    })
}

#[test]
fn unknown_tag_requests_no_blobs() {
    let _ = env_logger::builder().is_test(true).try_init();
    Runtime::new().unwrap().block_on(async {
        let server = MockServer::start().await;
        mock_token(&server, "library/hello").await;
        Mock::given(method("GET"))
            .and(path("/v2/library/hello/manifests/no-such-tag"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("^/v2/.*/blobs/.*$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let base = TempDir::new().unwrap();
        let err = pull(&client_for(&server, 3), "hello:no-such-tag", &base)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            PipelineError::Manifest(ManifestError::UnknownTag(ref image)) if image.as_str() == "hello:no-such-tag"
        ));
        assert_eq!(err.exit_code(), 122);
        assert_eq!(fs::read_dir(base.path()).unwrap().count(), 0);
    })
}

#[test]
fn refused_token_is_unauthorized() {
    let _ = env_logger::builder().is_test(true).try_init();
    Runtime::new().unwrap().block_on(async {
        let server = MockServer::start().await;
        mock_token(&server, "library/hello").await;
        Mock::given(method("GET"))
            .and(path("/v2/library/hello/manifests/latest"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let base = TempDir::new().unwrap();
        let err = pull(&client_for(&server, 3), "hello", &base)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            PipelineError::Manifest(ManifestError::Unauthorized(StatusCode::UNAUTHORIZED))
        ));
    })
}

#[test]
fn failing_layer_stops_materialization() {
    let _ = env_logger::builder().is_test(true).try_init();
    Runtime::new().unwrap().block_on(async {
        let server = MockServer::start().await;
        let digests = [digest('5'), digest('6'), digest('7')];
        mock_token(&server, "library/broken").await;
        mock_manifest(
            &server,
            "library/broken",
            "latest",
            manifest(&[&digests[0], &digests[1], &digests[2]]),
        )
        .await;
        mock_blob(
            &server,
            "library/broken",
            &digests[0],
            ResponseTemplate::new(200).set_body_bytes(layer(&[("one", "1")])),
        )
        .await;
        mock_blob(&server, "library/broken", &digests[1], ResponseTemplate::new(403)).await;
        Mock::given(method("GET"))
            .and(path(format!("/v2/library/broken/blobs/{}", digests[2])))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(layer(&[("three", "3")])))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server, 1);
        let image: ImageName = "broken".parse().unwrap();
        let token = client.authenticate(&image).await.unwrap();
        let manifest = client.fetch_manifest(&image, &token).await.unwrap();
        assert_eq!(manifest.layers.len(), 3);

        let base = TempDir::new().unwrap();
        let mut root = RootBuilder::new(ScratchDir::new_in(base.path()).unwrap(), 3);
        let err = client
            .materialize_layers(&image, &manifest, &token, &mut root)
            .await
            .unwrap_err();
        assert_eq!(err.digest.to_string(), digests[1]);
        assert!(matches!(err.reason, LayerFailure::Status(StatusCode::FORBIDDEN)));
        assert_eq!(root.applied(), 1);
        assert!(root.path().join("one").exists());
        assert!(!root.path().join("three").exists());
        assert!(leftover_archives(root.path()).is_empty());
        assert!(!root.finish().is_complete());
    })
}

#[test]
fn failing_layer_aborts_pull() {
    let _ = env_logger::builder().is_test(true).try_init();
    Runtime::new().unwrap().block_on(async {
        let server = MockServer::start().await;
        let (good, bad) = (digest('8'), digest('9'));
        mock_token(&server, "library/broken").await;
        mock_manifest(&server, "library/broken", "latest", manifest(&[&good, &bad])).await;
        mock_blob(
            &server,
            "library/broken",
            &good,
            ResponseTemplate::new(200).set_body_bytes(layer(&[("one", "1")])),
        )
        .await;
        mock_blob(
            &server,
            "library/broken",
            &bad,
            ResponseTemplate::new(200).set_body_bytes(b"\x1f\x8b this is not a layer".to_vec()),
        )
        .await;

        let base = TempDir::new().unwrap();
        let err = pull(&client_for(&server, 1), "broken", &base)
            .await
            .err()
            .unwrap();
        assert_eq!(err.exit_code(), 123);
        match err {
            PipelineError::Layer(err) => {
                assert_eq!(err.digest.to_string(), bad);
                assert!(matches!(err.reason, LayerFailure::Extract(_)));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(fs::read_dir(base.path()).unwrap().count(), 0);
    })
}

#[test]
fn token_server_discovered_from_challenge() {
    let _ = env_logger::builder().is_test(true).try_init();
    Runtime::new().unwrap().block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(401).insert_header(
                "www-authenticate",
                format!(
                    "Bearer realm=\"{}/auth\",service=\"discovered\"",
                    server.uri()
                )
                .as_str(),
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth"))
            .and(query_param("service", "discovered"))
            .and(query_param("scope", "repository:tools/thing:pull"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": TOKEN})))
            .expect(1)
            .mount(&server)
            .await;
        mock_manifest(&server, "tools/thing", "2.1", manifest(&[])).await;

        let client = Client::builder()
            .registry(&DefaultRegistry::from_url(parse_url(&server.uri()).unwrap()))
            .build()
            .unwrap();
        let base = TempDir::new().unwrap();
        let root = pull(&client, "tools/thing:2.1", &base).await.unwrap();
        assert_eq!(root.expected(), 0);
        assert!(root.validate().is_ok());
    })
}

#[test]
fn open_registry_needs_no_token() {
    let _ = env_logger::builder().is_test(true).try_init();
    Runtime::new().unwrap().block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/hello/manifests/latest"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(manifest(&[]), media_types::MANIFEST),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::builder()
            .registry(&DefaultRegistry::from_url(parse_url(&server.uri()).unwrap()))
            .build()
            .unwrap();
        let image: ImageName = "hello".parse().unwrap();
        let token = client.authenticate(&image).await.unwrap();
        assert!(token.is_anonymous());
        let manifest = client.fetch_manifest(&image, &token).await.unwrap();
        assert!(manifest.layers.is_empty());
    })
}
