//! Shared fixtures for the HTTP backend tests.

#![allow(dead_code)]

use axum::Router;
use flate2::write::GzEncoder;
use flate2::Compression;

/// A gzipped tarball holding `<name>/DESCRIPTION`.
pub fn archive(name: &str, version: &str, extra: &str) -> Vec<u8> {
    let manifest = format!("Package: {name}\nVersion: {version}\nLicense: MIT\n{extra}");
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(manifest.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, format!("{name}/DESCRIPTION"), manifest.as_bytes())
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

/// Serve `app` on an ephemeral port. Returns the base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
