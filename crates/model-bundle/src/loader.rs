// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Reading and writing bundle directories.
//!
//! A bundle directory holds:
//! - `manifest.json`: the [`Manifest`].
//! - the entrypoint file named by `manifest.entrypoint`, if any.
//! - every file listed under `manifest.files`.
//!
//! Loading does not verify the digest; adapters verify before they load.

use crate::{BundleError, Manifest, ModelBundle};
use std::collections::BTreeMap;
use std::path::Path;

/// Manifest filename inside a bundle directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Reads bundles from and writes bundles to directories.
pub struct BundleLoader;

impl BundleLoader {
    /// Reads a bundle from `dir`.
    pub fn from_dir(dir: &Path) -> Result<ModelBundle, BundleError> {
        let manifest = Manifest::from_file(&dir.join(MANIFEST_FILE))?;

        let code = match &manifest.entrypoint {
            Some(entrypoint) => {
                let path = dir.join(entrypoint);
                Some(std::fs::read_to_string(&path).map_err(|source| BundleError::Io {
                    path: path.display().to_string(),
                    source,
                })?)
            }
            None => None,
        };

        let mut files = BTreeMap::new();
        for name in manifest.files.keys() {
            let path = dir.join(name);
            let content = std::fs::read(&path).map_err(|source| BundleError::Io {
                path: path.display().to_string(),
                source,
            })?;
            files.insert(name.clone(), content);
        }

        tracing::debug!(
            bundle = %manifest.name,
            dir = %dir.display(),
            files = files.len(),
            "bundle read from directory"
        );
        Ok(ModelBundle::from_parts(manifest, code, files))
    }

    /// Writes `bundle` into `dir`, creating it if needed.
    pub fn write_dir(bundle: &ModelBundle, dir: &Path) -> Result<(), BundleError> {
        let io_err = |path: &Path| {
            let path = path.display().to_string();
            move |source| BundleError::Io { path, source }
        };

        std::fs::create_dir_all(dir).map_err(io_err(dir))?;
        let manifest_path = dir.join(MANIFEST_FILE);
        std::fs::write(&manifest_path, bundle.manifest().to_json()?)
            .map_err(io_err(&manifest_path))?;

        if let (Some(entrypoint), Some(code)) = (&bundle.manifest().entrypoint, bundle.code()) {
            let path = dir.join(entrypoint);
            std::fs::write(&path, code).map_err(io_err(&path))?;
        }
        for (name, content) in bundle.files() {
            let path = dir.join(name);
            std::fs::write(&path, content).map_err(io_err(&path))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BundleBuilder, IoSpec};

    #[test]
    fn test_write_then_read_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = BundleBuilder::new("roundtrip", "1.0.0", "interpreter")
            .code("model.rt", "fn predict(input) = input.x;")
            .file("table.json", b"[1, 2, 3]".to_vec())
            .input(IoSpec::new("x", "any"))
            .build();

        BundleLoader::write_dir(&bundle, dir.path()).unwrap();
        let loaded = BundleLoader::from_dir(dir.path()).unwrap();

        loaded.verify().unwrap();
        assert_eq!(loaded.code(), bundle.code());
        assert_eq!(loaded.file("table.json"), Some(&b"[1, 2, 3]"[..]));
    }

    #[test]
    fn test_missing_listed_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = BundleBuilder::new("broken", "1.0.0", "tensor")
            .model_file("model.json", b"{}".to_vec())
            .build();
        BundleLoader::write_dir(&bundle, dir.path()).unwrap();
        std::fs::remove_file(dir.path().join("model.json")).unwrap();

        let err = BundleLoader::from_dir(dir.path()).unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(BundleLoader::from_dir(dir.path()).unwrap_err().is_io());
    }
}
