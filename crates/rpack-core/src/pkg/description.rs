//! DESCRIPTION manifest parsing.
//!
//! The manifest is a block of `Key: value` fields. A field's value may
//! continue on the following lines; continuation lines are indented, or at
//! least do not start with a `Key:` token. Keys are case-insensitive.

use super::error::PkgError;
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path};
use tar::Archive;

/// Manifest file name inside a package.
pub const MANIFEST_FILE: &str = "DESCRIPTION";

/// Manifests larger than this are rejected as corrupt.
const MAX_MANIFEST_SIZE: u64 = 1024 * 1024;

/// Parsed manifest fields, keyed by lower-cased field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    fields: BTreeMap<String, String>,
}

impl Manifest {
    /// Parse manifest text. Never fails; garbage yields an empty manifest.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut fields = BTreeMap::new();
        let mut current: Option<(String, String)> = None;

        for raw in text.lines() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            if let Some((key, value)) = split_field(line) {
                if let Some((k, v)) = current.take() {
                    fields.insert(k, v);
                }
                current = Some((key.to_lowercase(), clean(value)));
            } else if let Some((_, value)) = current.as_mut() {
                let more = clean(line);
                if !more.is_empty() {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(&more);
                }
            }
            // text before the first field is ignored
        }
        if let Some((k, v)) = current {
            fields.insert(k, v);
        }

        Self { fields }
    }

    /// Raw value of a field (case-insensitive key).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(&key.to_lowercase()).map(String::as_str)
    }

    /// A list-valued field split into package names.
    #[must_use]
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key).map(split_dependency_list).unwrap_or_default()
    }

    #[must_use]
    pub fn package(&self) -> Option<&str> {
        self.get("package").filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.get("version").filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn license(&self) -> Option<&str> {
        self.get("license")
    }

    /// Number of fields, recognized or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// `Key: value` when the line opens a new field.
fn split_field(line: &str) -> Option<(&str, &str)> {
    let first = line.chars().next()?;
    if first.is_whitespace() {
        return None;
    }
    let (key, value) = line.split_once(':')?;
    let valid_key = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '/' | '-'));
    valid_key.then_some((key, value))
}

fn clean(s: &str) -> String {
    s.replace(['\t', '\r', '\n'], " ").trim().to_string()
}

/// Split `a (>= 1.0), b,c` into `["a", "b", "c"]`.
///
/// Version constraints in parentheses are dropped, entries are trimmed and
/// empty entries removed. Order and duplicates are preserved.
#[must_use]
pub fn split_dependency_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.split('(').next().unwrap_or(entry).trim())
        .filter(|entry| !entry.is_empty())
        .map(String::from)
        .collect()
}

/// Read `<dir>/DESCRIPTION`.
pub fn read_manifest_dir(dir: &Path) -> Result<Manifest, PkgError> {
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(PkgError::manifest_not_found(&dir.display().to_string()));
    }
    let text = rpack_util::fs::read_to_string_lossy(&path)?;
    Ok(Manifest::parse(&text))
}

/// Read `<name>/DESCRIPTION` from a gzipped tar archive without unpacking it.
pub fn read_manifest_archive(archive_path: &Path, name: &str) -> Result<Manifest, PkgError> {
    let file = File::open(archive_path).map_err(|e| {
        PkgError::archive_corrupt(format!(
            "Failed to open archive {}: {e}",
            archive_path.display()
        ))
    })?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let corrupt = |e: std::io::Error| {
        PkgError::archive_corrupt(format!(
            "Failed to read archive {}: {e}",
            archive_path.display()
        ))
    };

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let is_manifest = {
            let path = entry.path().map_err(corrupt)?;
            let mut parts = path
                .components()
                .filter(|c| !matches!(c, Component::CurDir));
            matches!(
                (parts.next(), parts.next(), parts.next()),
                (Some(Component::Normal(dir)), Some(Component::Normal(file)), None)
                    if dir == OsStr::new(name) && file == OsStr::new(MANIFEST_FILE)
            )
        };
        if !is_manifest {
            continue;
        }
        if entry.size() > MAX_MANIFEST_SIZE {
            return Err(PkgError::archive_corrupt(format!(
                "{name}/{MANIFEST_FILE} is {} bytes (max: {MAX_MANIFEST_SIZE})",
                entry.size()
            )));
        }
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).map_err(corrupt)?;
        return Ok(Manifest::parse(&String::from_utf8_lossy(&bytes)));
    }

    Err(PkgError::manifest_not_found(&format!(
        "{} (expected {name}/{MANIFEST_FILE})",
        archive_path.display()
    )))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pkg::error::codes;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tar::Builder;
    use tempfile::tempdir;

    pub(crate) const FOOBAR: &str = "Package: FooBar\n\
Type: Package\n\
Title: What the Package Does\n\
Version: 0.99.1\n\
Date: 2016-02-22\n\
Author: Who wrote it\n\
Depends: R (>= 3.0)\n\
Imports: methods,\n    utils\n\
Suggests: Rtoto (>= 1.0.0), Rtiti\n\
License: GPL-2\n\
URL: https://example.org/foobar\n";

    /// Build a `.tar.gz` holding the given `(path, content)` entries.
    pub(crate) fn build_archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut tar_bytes = Vec::new();
        {
            let mut builder = Builder::new(&mut tar_bytes);
            for (path, content) in entries {
                let mut header = tar::Header::new_gnu();
                header.set_path(path).unwrap();
                header.set_size(content.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append(&header, content.as_bytes()).unwrap();
            }
            builder.finish().unwrap();
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_parse_fields() {
        let m = Manifest::parse(FOOBAR);
        assert_eq!(m.package(), Some("FooBar"));
        assert_eq!(m.version(), Some("0.99.1"));
        assert_eq!(m.license(), Some("GPL-2"));
        assert_eq!(m.list("depends"), vec!["R"]);
        assert_eq!(m.list("Imports"), vec!["methods", "utils"]);
        assert_eq!(m.list("suggests"), vec!["Rtoto", "Rtiti"]);
        // unrecognized keys are kept
        assert_eq!(m.get("type"), Some("Package"));
    }

    #[test]
    fn test_url_value_keeps_colons() {
        let m = Manifest::parse(FOOBAR);
        assert_eq!(m.get("url"), Some("https://example.org/foobar"));
    }

    #[test]
    fn test_continuation_lines_join_with_space() {
        let text = "Package: x\nLicense: GPL-2 and some\n  blahblah\nDescription: line one\n\tline two: with colon\n";
        let m = Manifest::parse(text);
        assert_eq!(m.license(), Some("GPL-2 and some blahblah"));
        assert_eq!(m.get("description"), Some("line one line two: with colon"));
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let text = "Package: x\r\nImports: a,\r\n\r\n  b (>= 2)\r\n";
        let m = Manifest::parse(text);
        assert_eq!(m.package(), Some("x"));
        assert_eq!(m.list("imports"), vec!["a", "b"]);
    }

    #[test]
    fn test_split_dependency_list() {
        assert_eq!(
            split_dependency_list("R (>= 3.0), methods,, utils ,utils"),
            vec!["R", "methods", "utils", "utils"]
        );
        assert!(split_dependency_list("").is_empty());
        assert!(split_dependency_list(" , ").is_empty());
    }

    #[test]
    fn test_empty_manifest() {
        let m = Manifest::parse("no fields here\n");
        assert!(m.is_empty());
        assert_eq!(m.package(), None);
    }

    #[test]
    fn test_read_manifest_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), FOOBAR).unwrap();
        let m = read_manifest_dir(dir.path()).unwrap();
        assert_eq!(m.package(), Some("FooBar"));
    }

    #[test]
    fn test_read_manifest_dir_missing() {
        let dir = tempdir().unwrap();
        let err = read_manifest_dir(dir.path()).unwrap_err();
        assert_eq!(err.code(), codes::PKG_MANIFEST_NOT_FOUND);
    }

    #[test]
    fn test_read_manifest_archive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("FooBar_0.99.1.tar.gz");
        let bytes = build_archive(&[
            ("FooBar/R/foo.R", "foo <- function() 1\n"),
            ("FooBar/DESCRIPTION", FOOBAR),
        ]);
        std::fs::write(&path, bytes).unwrap();

        let m = read_manifest_archive(&path, "FooBar").unwrap();
        assert_eq!(m.version(), Some("0.99.1"));
    }

    #[test]
    fn test_read_manifest_archive_ignores_nested_descriptions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("FooBar_0.99.1.tar.gz");
        let bytes = build_archive(&[("FooBar/inst/DESCRIPTION", "Package: Wrong\n")]);
        std::fs::write(&path, bytes).unwrap();

        let err = read_manifest_archive(&path, "FooBar").unwrap_err();
        assert_eq!(err.code(), codes::PKG_MANIFEST_NOT_FOUND);
    }

    #[test]
    fn test_read_manifest_archive_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("FooBar_0.99.1.tar.gz");
        std::fs::write(&path, b"<html>not an archive</html>").unwrap();

        let err = read_manifest_archive(&path, "FooBar").unwrap_err();
        assert_eq!(err.code(), codes::PKG_ARCHIVE_CORRUPT);
    }
}
