//! Code-loading contexts for custom task and type declarations.
//!
//! A [`LoaderContext`] stands in for Ant's class loader during resolution:
//! an ordered list of classpath entries (class directories and jars) plus
//! an optional parent consulted first. No code is ever executed; the
//! context answers the two questions resolution needs, "do these entries
//! contain this logical resource" and "is this binary class name loadable".

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use formica_syntax::FilesProvider;
use thiserror::Error;

const CLASS_MAGIC: u32 = 0xCAFE_BABE;
/// Highest class-file major version accepted (Java 25).
const MAX_CLASS_MAJOR: u16 = 69;

#[derive(Debug, Error)]
pub enum ClasspathError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Identity of a classpath entry's current on-disk state. Two equal
/// fingerprints mean the entry has not changed since the last look.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClasspathFingerprint(u64);

impl ClasspathFingerprint {
    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ClasspathEntry {
    ClassDir(PathBuf),
    Jar(PathBuf),
}

impl ClasspathEntry {
    /// Classifies `path` the way Ant does: a directory holds loose classes
    /// and resources, anything else is read as an archive.
    pub fn from_path(path: PathBuf) -> Self {
        if path.is_dir() {
            ClasspathEntry::ClassDir(path)
        } else {
            ClasspathEntry::Jar(path)
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ClasspathEntry::ClassDir(p) | ClasspathEntry::Jar(p) => p,
        }
    }

    pub fn fingerprint(&self) -> std::io::Result<ClasspathFingerprint> {
        match self {
            ClasspathEntry::ClassDir(dir) => fingerprint_class_dir(dir),
            ClasspathEntry::Jar(path) => fingerprint_file(path),
        }
    }

    /// Bytes of the `logical` resource inside this entry, `Ok(None)` when
    /// the entry does not carry it. A missing entry file reads as absence:
    /// build files routinely reference jars that are not built yet.
    pub fn open_resource(&self, logical: &str) -> Result<Option<Vec<u8>>, ClasspathError> {
        match self {
            ClasspathEntry::ClassDir(dir) => {
                let path = dir.join(logical);
                match std::fs::read(&path) {
                    Ok(bytes) => Ok(Some(bytes)),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(err) => Err(err.into()),
                }
            }
            ClasspathEntry::Jar(path) => {
                let file = match std::fs::File::open(path) {
                    Ok(file) => file,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                    Err(err) => return Err(err.into()),
                };
                let mut archive = zip::ZipArchive::new(file)?;
                let result = match archive.by_name(logical) {
                    Ok(mut entry) => {
                        let mut bytes = Vec::with_capacity(entry.size() as usize);
                        entry.read_to_end(&mut bytes)?;
                        Ok(Some(bytes))
                    }
                    Err(zip::result::ZipError::FileNotFound) => Ok(None),
                    Err(err) => Err(err.into()),
                };
                result
            }
        }
    }
}

fn fingerprint_file(path: &Path) -> std::io::Result<ClasspathFingerprint> {
    let meta = std::fs::metadata(path)?;
    let mut hasher = DefaultHasher::new();
    path.to_string_lossy().hash(&mut hasher);
    meta.len().hash(&mut hasher);
    hash_mtime(&mut hasher, &meta.modified()?);
    Ok(ClasspathFingerprint(hasher.finish()))
}

fn fingerprint_class_dir(dir: &Path) -> std::io::Result<ClasspathFingerprint> {
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
    {
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();

    let mut hasher = DefaultHasher::new();
    dir.to_string_lossy().hash(&mut hasher);
    for file in files {
        let rel = file.strip_prefix(dir).unwrap_or(&file);
        let meta = std::fs::metadata(&file)?;
        rel.to_string_lossy().hash(&mut hasher);
        meta.len().hash(&mut hasher);
        hash_mtime(&mut hasher, &meta.modified()?);
    }
    Ok(ClasspathFingerprint(hasher.finish()))
}

fn hash_mtime(hasher: &mut DefaultHasher, time: &SystemTime) {
    let duration = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| std::time::Duration::from_secs(0));
    duration.as_secs().hash(hasher);
    duration.subsec_nanos().hash(hasher);
}

/// What a successful class lookup reveals. Nothing past the class-file
/// header is inspected; resolution only needs existence and loadability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassSummary {
    pub binary_name: String,
    /// Class-file major version (52 is Java 8).
    pub major_version: u16,
    /// The entry the definition came from.
    pub defined_in: PathBuf,
}

/// Classified failure of a class lookup, mirroring the JVM's distinction
/// between a class that is absent, one whose definition cannot be read,
/// and one compiled for a newer runtime.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ClassLoadError {
    #[error("class {0} not found")]
    NotFound(String),
    #[error("definition of class {0} not found")]
    DefinitionNotFound(String),
    #[error("class {name} has unsupported class file version {major}")]
    UnsupportedVersion { name: String, major: u16 },
}

/// An ordered set of classpath entries with an optional parent context
/// consulted first, the delegation order Java loaders use.
#[derive(Debug, Default)]
pub struct LoaderContext {
    entries: Vec<ClasspathEntry>,
    parent: Option<Arc<LoaderContext>>,
}

impl LoaderContext {
    pub fn new(entries: Vec<ClasspathEntry>) -> Self {
        Self {
            entries,
            parent: None,
        }
    }

    pub fn with_parent(entries: Vec<ClasspathEntry>, parent: Arc<LoaderContext>) -> Self {
        Self {
            entries,
            parent: Some(parent),
        }
    }

    pub fn entries(&self) -> &[ClasspathEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.parent.as_ref().is_none_or(|parent| parent.is_empty())
    }

    /// First match wins, parent before own entries.
    pub fn open_resource(&self, logical: &str) -> Result<Option<Vec<u8>>, ClasspathError> {
        if let Some(parent) = &self.parent {
            if let Some(bytes) = parent.open_resource(logical)? {
                return Ok(Some(bytes));
            }
        }
        for entry in &self.entries {
            if let Some(bytes) = entry.open_resource(logical)? {
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }

    /// Looks `binary_name` up across the context and classifies the
    /// outcome from the class-file header.
    pub fn load_class(&self, binary_name: &str) -> Result<ClassSummary, ClassLoadError> {
        let logical = format!("{}.class", binary_name.replace('.', "/"));
        let (bytes, defined_in) = match self.find_class_bytes(&logical) {
            Ok(Some(found)) => found,
            Ok(None) => return Err(ClassLoadError::NotFound(binary_name.to_string())),
            Err(err) => {
                tracing::debug!(class = binary_name, error = %err, "classpath read failed");
                return Err(ClassLoadError::DefinitionNotFound(binary_name.to_string()));
            }
        };
        if bytes.len() < 8
            || u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) != CLASS_MAGIC
        {
            return Err(ClassLoadError::DefinitionNotFound(binary_name.to_string()));
        }
        let major = u16::from_be_bytes([bytes[6], bytes[7]]);
        if major > MAX_CLASS_MAJOR {
            return Err(ClassLoadError::UnsupportedVersion {
                name: binary_name.to_string(),
                major,
            });
        }
        Ok(ClassSummary {
            binary_name: binary_name.to_string(),
            major_version: major,
            defined_in,
        })
    }

    fn find_class_bytes(
        &self,
        logical: &str,
    ) -> Result<Option<(Vec<u8>, PathBuf)>, ClasspathError> {
        if let Some(parent) = &self.parent {
            if let Some(found) = parent.find_class_bytes(logical)? {
                return Ok(Some(found));
            }
        }
        for entry in &self.entries {
            if let Some(bytes) = entry.open_resource(logical)? {
                return Ok(Some((bytes, entry.path().to_path_buf())));
            }
        }
        Ok(None)
    }

    /// Combined identity over every entry, parent included. Entries that
    /// cannot be stat-ed contribute their path alone.
    pub fn fingerprint(&self) -> ClasspathFingerprint {
        let mut hasher = DefaultHasher::new();
        self.hash_into(&mut hasher);
        ClasspathFingerprint(hasher.finish())
    }

    fn hash_into(&self, hasher: &mut DefaultHasher) {
        if let Some(parent) = &self.parent {
            parent.hash_into(hasher);
        }
        for entry in &self.entries {
            match entry.fingerprint() {
                Ok(fingerprint) => fingerprint.hash(hasher),
                Err(_) => entry.path().to_string_lossy().hash(hasher),
            }
        }
    }
}

/// Enumerates the files under one directory for classpath collection.
///
/// Ant filesets carry include/exclude patterns; pattern evaluation stays
/// outside this crate, so the provider yields every file and the caller
/// rules paths out through `excluded`.
#[derive(Debug, Clone)]
pub struct DiskFileSet {
    dir: PathBuf,
}

impl DiskFileSet {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FilesProvider for DiskFileSet {
    fn files(&self, excluded: &BTreeSet<PathBuf>) -> BTreeSet<PathBuf> {
        let mut files = BTreeSet::new();
        let walker = walkdir::WalkDir::new(&self.dir)
            .follow_links(false)
            .into_iter();
        for entry in walker.filter_entry(|entry| !excluded.contains(entry.path())) {
            let Ok(entry) = entry else {
                continue;
            };
            if entry.file_type().is_file() {
                files.insert(entry.into_path());
            }
        }
        files
    }
}
