// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The immutable model bundle and its builder.

use crate::formats::ModelFormat;
use crate::integrity::{payload_digest, sha256_hex};
use crate::{BundleError, FileRecord, IoSpec, Manifest, RuntimeKind};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug)]
struct BundleInner {
    manifest: Manifest,
    code: Option<String>,
    files: BTreeMap<String, Vec<u8>>,
}

/// A manifest plus its payload. Cloning is cheap; the content is shared.
#[derive(Debug, Clone)]
pub struct ModelBundle {
    inner: Arc<BundleInner>,
}

impl ModelBundle {
    /// Assembles a bundle from parts without recomputing any digest.
    ///
    /// The result may fail [`ModelBundle::verify`]; use [`BundleBuilder`] to
    /// produce a sealed bundle.
    pub fn from_parts(
        manifest: Manifest,
        code: Option<String>,
        files: BTreeMap<String, Vec<u8>>,
    ) -> Self {
        Self {
            inner: Arc::new(BundleInner {
                manifest,
                code,
                files,
            }),
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.inner.manifest
    }

    pub fn name(&self) -> &str {
        &self.inner.manifest.name
    }

    /// Script code, when the bundle carries an entrypoint.
    pub fn code(&self) -> Option<&str> {
        self.inner.code.as_deref()
    }

    pub fn files(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.inner.files
    }

    pub fn file(&self, name: &str) -> Option<&[u8]> {
        self.inner.files.get(name).map(Vec::as_slice)
    }

    /// The model file named by the manifest, with its name.
    pub fn model_file(&self) -> Option<(&str, &[u8])> {
        let name = self.inner.manifest.model_file.as_deref()?;
        self.file(name).map(|bytes| (name, bytes))
    }

    /// Format of the model file, if there is one and it is recognised.
    pub fn model_format(&self) -> Option<ModelFormat> {
        self.model_file()
            .and_then(|(name, bytes)| ModelFormat::detect(name, bytes))
    }

    pub fn inputs(&self) -> &[IoSpec] {
        &self.inner.manifest.inputs
    }

    pub fn outputs(&self) -> &[IoSpec] {
        &self.inner.manifest.outputs
    }

    /// See [`Manifest::declared_runtime`].
    pub fn declared_runtime(&self) -> Result<Option<RuntimeKind>, BundleError> {
        self.inner.manifest.declared_runtime()
    }

    /// Total payload size in bytes (code plus files).
    pub fn size_bytes(&self) -> u64 {
        let code = self.inner.code.as_ref().map_or(0, |c| c.len());
        let files: usize = self.inner.files.values().map(Vec::len).sum();
        (code + files) as u64
    }

    /// Recomputes the payload digest from the current content.
    pub fn compute_digest(&self) -> String {
        payload_digest(self.code(), &self.inner.files)
    }

    /// Verifies manifest completeness, file records and the payload digest.
    pub fn verify(&self) -> Result<(), BundleError> {
        let manifest = &self.inner.manifest;
        manifest.check_complete()?;

        if let Some(entrypoint) = &manifest.entrypoint {
            if self.inner.code.is_none() {
                return Err(BundleError::Incomplete(format!(
                    "entrypoint '{entrypoint}' declared but no code is present"
                )));
            }
        }

        for (name, record) in &manifest.files {
            let content = self.file(name).ok_or_else(|| BundleError::FileRecord {
                name: name.clone(),
                detail: "file is listed but missing".into(),
            })?;
            if content.len() as u64 != record.size {
                return Err(BundleError::FileRecord {
                    name: name.clone(),
                    detail: format!("size {} does not match record {}", content.len(), record.size),
                });
            }
            let actual = sha256_hex(content);
            if !actual.eq_ignore_ascii_case(&record.sha256) {
                return Err(BundleError::FileRecord {
                    name: name.clone(),
                    detail: format!("sha256 {actual} does not match record {}", record.sha256),
                });
            }
        }
        if let Some(extra) = self.inner.files.keys().find(|k| !manifest.files.contains_key(*k)) {
            return Err(BundleError::FileRecord {
                name: extra.clone(),
                detail: "file is present but not listed in the manifest".into(),
            });
        }

        let actual = self.compute_digest();
        if !actual.eq_ignore_ascii_case(manifest.sha256.trim()) {
            return Err(BundleError::IntegrityMismatch {
                expected: manifest.sha256.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// One-line description for logs and the CLI.
    pub fn summary(&self) -> String {
        let m = &self.inner.manifest;
        format!(
            "{} v{} (runtime: {}, {} inputs, {} outputs, {} files, {} bytes)",
            m.name,
            m.version,
            m.runtime,
            m.inputs.len(),
            m.outputs.len(),
            self.inner.files.len(),
            self.size_bytes(),
        )
    }
}

/// Builds a sealed [`ModelBundle`]: file records and the payload digest are
/// computed on [`BundleBuilder::build`].
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    manifest: Manifest,
    code: Option<String>,
    files: BTreeMap<String, Vec<u8>>,
}

impl BundleBuilder {
    pub fn new(name: impl Into<String>, version: impl Into<String>, runtime: impl Into<String>) -> Self {
        Self {
            manifest: Manifest {
                name: name.into(),
                version: version.into(),
                runtime: runtime.into(),
                entrypoint: None,
                entry_function: crate::DEFAULT_ENTRY_FUNCTION.to_string(),
                model_file: None,
                dependencies: Vec::new(),
                sha256: String::new(),
                inputs: Vec::new(),
                outputs: Vec::new(),
                files: BTreeMap::new(),
                operations: Vec::new(),
            },
            code: None,
            files: BTreeMap::new(),
        }
    }

    /// Sets the script code and its entrypoint file name.
    pub fn code(mut self, entrypoint: impl Into<String>, code: impl Into<String>) -> Self {
        self.manifest.entrypoint = Some(entrypoint.into());
        self.code = Some(code.into());
        self
    }

    pub fn entry_function(mut self, name: impl Into<String>) -> Self {
        self.manifest.entry_function = name.into();
        self
    }

    /// Adds a file and marks it as the model file.
    pub fn model_file(mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let name = name.into();
        self.manifest.model_file = Some(name.clone());
        self.files.insert(name, content.into());
        self
    }

    pub fn file(mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(name.into(), content.into());
        self
    }

    pub fn input(mut self, spec: IoSpec) -> Self {
        self.manifest.inputs.push(spec);
        self
    }

    pub fn output(mut self, spec: IoSpec) -> Self {
        self.manifest.outputs.push(spec);
        self
    }

    pub fn dependency(mut self, name: impl Into<String>) -> Self {
        self.manifest.dependencies.push(name.into());
        self
    }

    pub fn operations<I, S>(mut self, ops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest.operations.extend(ops.into_iter().map(Into::into));
        self
    }

    /// Computes file records and the payload digest, then freezes the bundle.
    pub fn build(mut self) -> ModelBundle {
        self.manifest.files = self
            .files
            .iter()
            .map(|(name, content)| {
                let record = FileRecord {
                    size: content.len() as u64,
                    sha256: sha256_hex(content),
                };
                (name.clone(), record)
            })
            .collect();
        self.manifest.sha256 = payload_digest(self.code.as_deref(), &self.files);
        ModelBundle::from_parts(self.manifest, self.code, self.files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ModelBundle {
        BundleBuilder::new("sample", "0.1.0", "graph")
            .model_file("model.graph.json", br#"{"format":"graph-model"}"#.to_vec())
            .file("labels.txt", b"a\nb\n".to_vec())
            .input(IoSpec::new("x", "float32"))
            .build()
    }

    #[test]
    fn test_builder_seals_bundle() {
        let bundle = sample();
        bundle.verify().unwrap();
        assert_eq!(bundle.manifest().files.len(), 2);
        assert_eq!(bundle.manifest().sha256.len(), 64);
        assert_eq!(bundle.model_file().unwrap().0, "model.graph.json");
    }

    #[test]
    fn test_tampered_file_fails_record_check() {
        let bundle = sample();
        let mut files = bundle.files().clone();
        files.insert("labels.txt".into(), b"a\nc\n".to_vec());
        let tampered = ModelBundle::from_parts(bundle.manifest().clone(), None, files);
        assert!(matches!(tampered.verify(), Err(BundleError::FileRecord { .. })));
    }

    #[test]
    fn test_tampered_code_fails_digest() {
        let bundle = BundleBuilder::new("s", "1", "interpreter")
            .code("m.rt", "fn predict(x) = x;")
            .build();
        let tampered = ModelBundle::from_parts(
            bundle.manifest().clone(),
            Some("fn predict(x) = 0;".into()),
            BTreeMap::new(),
        );
        assert!(matches!(
            tampered.verify(),
            Err(BundleError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn test_unlisted_file_rejected() {
        let bundle = sample();
        let mut files = bundle.files().clone();
        files.insert("extra.bin".into(), vec![0]);
        let tampered = ModelBundle::from_parts(bundle.manifest().clone(), None, files);
        assert!(tampered.verify().is_err());
    }

    #[test]
    fn test_size_and_summary() {
        let bundle = sample();
        assert_eq!(bundle.size_bytes(), 24 + 4);
        assert!(bundle.summary().contains("sample v0.1.0"));
    }

    #[test]
    fn test_clone_shares_content() {
        let a = sample();
        let b = a.clone();
        assert!(std::ptr::eq(a.manifest(), b.manifest()));
    }
}
