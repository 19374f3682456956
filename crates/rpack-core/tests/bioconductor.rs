//! Bioconductor backend against an in-process mock server.

mod common;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use rpack_core::pkg::{BiocProvider, BiocView, PackStatus, Provider, Selector};

const CHECK_RESULTS: &str = r#"<html><body>
<h3>Bioconductor 3.9 (release)</h3>
<h3 class="devel">Bioconductor 3.10 (devel)</h3>
<h3>Bioconductor 3.8</h3>
</body></html>"#;

async fn index(Path((release, index)): Path<(String, String)>) -> Response {
    if release != "3.10" {
        return (StatusCode::NOT_FOUND, "missing").into_response();
    }
    match index.trim_start_matches('/') {
        "bioc/packages.js" => {}
        "data/experiment/packages.js" | "data/annotation/packages.js" => {
            return r#"var data_packages = {"content": []};"#.into_response()
        }
        _ => return (StatusCode::NOT_FOUND, "missing").into_response(),
    }
    r#"var bioc_packages = {"content": [["a4", "Automated Affymetrix Array Analysis"], ["ABarray", "Microarray QA"], ["affy", "Methods for Affymetrix"]]};"#
        .into_response()
}

async fn detail(Path((release, segment, page)): Path<(String, String, String)>) -> Response {
    if release != "3.10" || segment != "bioc" {
        return (StatusCode::NOT_FOUND, "missing").into_response();
    }
    match page.as_str() {
        "a4.html" => Html(
            r#"<table><tr><td>Source Package</td><td><a href="../src/contrib/a4_1.32.0.tar.gz">a4_1.32.0.tar.gz</a></td></tr></table>"#,
        )
        .into_response(),
        "affy.html" => Html(
            r#"<a href="../src/contrib/affy_1.62.0.tar.gz">x</a> <a href="../src/contrib/affy_1.63.0.tar.gz">y</a>"#,
        )
        .into_response(),
        _ => (StatusCode::NOT_FOUND, "missing").into_response(),
    }
}

async fn archive(Path((_release, _segment, file)): Path<(String, String, String)>) -> Response {
    let Some((name, rest)) = file.split_once('_') else {
        return (StatusCode::NOT_FOUND, "missing").into_response();
    };
    let version = rest.trim_end_matches(".tar.gz");
    common::archive(name, version, "Imports: affy, methods\nSuggests: ALL\n").into_response()
}

async fn start() -> BiocProvider {
    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/checkResults/", get(|| async { Html(CHECK_RESULTS) }))
        .route("/packages/json/:release/*index", get(index))
        .route("/packages/:release/:segment/html/:page", get(detail))
        .route("/packages/:release/:segment/src/contrib/:file", get(archive));
    let base = common::serve(app).await;
    BiocProvider::new("bioc", Some(&base), 4).unwrap()
}

#[tokio::test]
async fn test_releases_newest_first() {
    let bioc = start().await;
    assert!(bioc.check_connection(1).await);
    assert_eq!(bioc.list_releases().await.unwrap(), vec!["3.10", "3.9", "3.8"]);
    assert_eq!(bioc.latest_release().await.unwrap(), "3.10");
}

#[tokio::test]
async fn test_list_skips_unresolvable_pages() {
    let bioc = start().await;
    assert_eq!(
        bioc.package_names("3.10", BiocView::Software).await.unwrap(),
        vec!["a4", "ABarray", "affy"]
    );

    // ABarray has no page and affy links two archives.
    let files = bioc.list(&Selector::Any).await.unwrap();
    assert_eq!(files, vec!["a4_1.32.0.tar.gz"]);

    let data = Selector::Bioc {
        release: "3.10".into(),
        view: BiocView::ExperimentData,
    };
    assert!(bioc.list(&data).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fetch_metadata() {
    let bioc = start().await;

    let a4 = bioc.fetch_metadata("a4", &Selector::Any, false).await.unwrap();
    assert_eq!(a4.status, PackStatus::Parsed);
    assert_eq!(a4.version.as_deref(), Some("1.32.0"));
    assert_eq!(a4.imports, vec!["affy", "methods"]);
    assert_eq!(a4.suggests, vec!["ALL"]);
    assert_eq!(a4.provider.as_deref(), Some("bioc"));

    let missing = bioc.fetch_metadata("ABarray", &Selector::Any, false).await.unwrap();
    assert_eq!(missing.status, PackStatus::NotFound);

    let ambiguous = bioc.fetch_metadata("affy", &Selector::Any, false).await.unwrap();
    assert_eq!(ambiguous.status, PackStatus::DownloadFailed);

    // A full archive name skips the detail page.
    let direct = bioc
        .fetch_metadata("affy_1.62.0.tar.gz", &Selector::Any, false)
        .await
        .unwrap();
    assert_eq!(direct.version.as_deref(), Some("1.62.0"));

    assert!(bioc
        .fetch_metadata("a4", &Selector::Snapshot("2020-01-01".into()), false)
        .await
        .is_err());
}
