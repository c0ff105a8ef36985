//! Bootstrap package: the ordered, compressed modules pushed to the remote
//!
//! Each module is gzip-compressed once. The compressed bytes are kept with
//! the module, and the manifest handed to the loader generator is derived
//! from those same bytes, so the length the loader reads and the bytes the
//! orchestrator writes cannot diverge.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::Path;

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

use crate::error::ProtocolError;

/// A named unit of code the remote side needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapModule {
    /// Module name; becomes the file name in the remote staging directory
    pub name: String,
    /// Uncompressed module contents (an executable or a script)
    pub source: Bytes,
}

impl BootstrapModule {
    /// Create a module from in-memory contents
    pub fn new(name: impl Into<String>, source: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Read a module's contents from disk
    pub fn from_path(name: impl Into<String>, path: &Path) -> Result<Self, ProtocolError> {
        let source = std::fs::read(path)?;
        Ok(Self::new(name, source))
    }
}

/// A module after compression, ready for the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedModule {
    name: String,
    payload: Bytes,
    original_len: usize,
}

impl CompressedModule {
    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exact bytes written to the channel for this module
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Number of bytes the loader will read for this module
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the compressed payload is empty (never true for gzip output)
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Size before compression
    pub fn original_len(&self) -> usize {
        self.original_len
    }
}

/// One manifest line: what the loader reads, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Module name
    pub name: String,
    /// Exact compressed length in bytes
    pub length: usize,
}

/// Ordered `(name, compressed length)` list baked into the loader text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Build a manifest from explicit entries
    ///
    /// Names follow the same rules as package modules.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, ProtocolError>
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let entries: Vec<ManifestEntry> = entries
            .into_iter()
            .map(|(name, length)| ManifestEntry {
                name: name.into(),
                length,
            })
            .collect();
        validate_names(entries.iter().map(|e| e.name.as_str()))?;
        Ok(Self { entries })
    }

    /// Entries in transfer order
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// The module the loader invokes after everything is staged
    pub fn entry_point(&self) -> &ManifestEntry {
        // validate_names guarantees at least one entry
        &self.entries[self.entries.len() - 1]
    }

    /// Total bytes the loader will read after the signature
    pub fn total_len(&self) -> usize {
        self.entries.iter().map(|e| e.length).sum()
    }
}

/// The ordered set of compressed modules for one bootstrap
#[derive(Debug, Clone)]
pub struct BootstrapPackage {
    modules: Vec<CompressedModule>,
}

impl BootstrapPackage {
    /// Compress the given modules, preserving their order
    pub fn build(modules: Vec<BootstrapModule>) -> Result<Self, ProtocolError> {
        validate_names(modules.iter().map(|m| m.name.as_str()))?;

        let modules = modules
            .into_iter()
            .map(|module| {
                let payload = compress(&module.source)?;
                tracing::debug!(
                    "Compressed module {}: {} -> {} bytes",
                    module.name,
                    module.source.len(),
                    payload.len()
                );
                Ok(CompressedModule {
                    name: module.name,
                    original_len: module.source.len(),
                    payload: Bytes::from(payload),
                })
            })
            .collect::<Result<Vec<_>, ProtocolError>>()?;

        Ok(Self { modules })
    }

    /// Load `(name, path)` pairs from disk and build the package
    pub fn from_paths<'a, I>(sources: I) -> Result<Self, ProtocolError>
    where
        I: IntoIterator<Item = (&'a str, &'a Path)>,
    {
        let modules = sources
            .into_iter()
            .map(|(name, path)| BootstrapModule::from_path(name, path))
            .collect::<Result<Vec<_>, _>>()?;
        Self::build(modules)
    }

    /// Compressed modules in transfer order
    pub fn modules(&self) -> &[CompressedModule] {
        &self.modules
    }

    /// Manifest derived from the compressed payloads
    pub fn manifest(&self) -> Manifest {
        Manifest {
            entries: self
                .modules
                .iter()
                .map(|m| ManifestEntry {
                    name: m.name.clone(),
                    length: m.len(),
                })
                .collect(),
        }
    }

    /// SHA-256 over the full compressed stream, hex-encoded
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for module in &self.modules {
            hasher.update(module.payload());
        }
        hex::encode(hasher.finalize())
    }
}

/// gzip-compress a module body at the best compression level
pub fn compress(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 64), Compression::best());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Inverse of [`compress`]
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn validate_names<'a>(names: impl Iterator<Item = &'a str>) -> Result<(), ProtocolError> {
    let mut seen = HashSet::new();
    for name in names {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
        if !valid {
            return Err(ProtocolError::InvalidModuleName(name.to_string()));
        }
        if !seen.insert(name) {
            return Err(ProtocolError::DuplicateModule(name.to_string()));
        }
    }
    if seen.is_empty() {
        return Err(ProtocolError::EmptyPackage);
    }
    Ok(())
}
