//! Binary package store
//!
//! Produces and consumes tar-based binary packages so a successful build
//! can be replayed without recompilation. Each tarball
//! `<name>-<version>-<arch>.tar.{gz,xz}` travels with a `.pkginfo` JSON
//! sidecar recording its SHA-256 and provenance; installation verifies
//! the tarball against the sidecar before anything is extracted.

use crate::error::{Error, Result};
use crate::hash::{compute_hash, Algorithm};
use crate::history::History;
use crate::hooks::HookManager;
use crate::sandbox::Sandbox;
use crate::utils::output::{print_debug, print_error};
use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

/// Default store location.
pub const DEFAULT_BINPKG_DIR: &str = "/var/cache/source/binpkgs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gz,
    Xz,
}

impl Compression {
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Gz => "tar.gz",
            Compression::Xz => "tar.xz",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Gz => f.write_str("gz"),
            Compression::Xz => f.write_str("xz"),
        }
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gz" => Ok(Compression::Gz),
            "xz" => Ok(Compression::Xz),
            other => Err(Error::Invalid(format!("unsupported compression: {other}"))),
        }
    }
}

/// Sidecar metadata. Field order is the on-disk key order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PkgInfo {
    pub name: String,
    pub version: String,
    pub arch: String,
    pub created_at: String,
    pub install_path: String,
    pub sha256: String,
    pub compress: Compression,
}

pub struct BinPkgStore<'a> {
    binpkg_dir: PathBuf,
    history: Option<&'a History>,
    verbose: bool,
}

impl<'a> BinPkgStore<'a> {
    pub fn new(binpkg_dir: impl Into<PathBuf>) -> Result<Self> {
        let binpkg_dir = binpkg_dir.into();
        std::fs::create_dir_all(&binpkg_dir)?;
        Ok(Self {
            binpkg_dir,
            history: None,
            verbose: false,
        })
    }

    pub fn with_history(mut self, history: &'a History) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn stem(name: &str, version: &str, arch: &str) -> String {
        format!("{name}-{version}-{arch}")
    }

    fn sidecar_path(&self, name: &str, version: &str, arch: &str) -> PathBuf {
        self.binpkg_dir
            .join(format!("{}.pkginfo", Self::stem(name, version, arch)))
    }

    /// Find the tarball for a package, trying gzip first.
    fn locate(&self, name: &str, version: &str, arch: &str) -> Option<(PathBuf, Compression)> {
        for compress in [Compression::Gz, Compression::Xz] {
            let candidate = self.binpkg_dir.join(format!(
                "{}.{}",
                Self::stem(name, version, arch),
                compress.extension()
            ));
            if candidate.exists() {
                return Some((candidate, compress));
            }
        }
        None
    }

    /// Tar up a staged install prefix into the store and write its
    /// sidecar. Returns the tarball path.
    pub fn create_binpkg(
        &self,
        name: &str,
        version: &str,
        install_path: &Path,
        arch: &str,
        compress: Compression,
    ) -> Result<PathBuf> {
        if !install_path.exists() {
            return Err(Error::NotFound(format!(
                "install path {}",
                install_path.display()
            )));
        }
        let arcname = install_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::Invalid(format!(
                    "install path has no base name: {}",
                    install_path.display()
                ))
            })?;

        let filepath = self.binpkg_dir.join(format!(
            "{}.{}",
            Self::stem(name, version, arch),
            compress.extension()
        ));

        let file = std::fs::File::create(&filepath)?;
        match compress {
            Compression::Gz => {
                let mut builder = tar::Builder::new(GzEncoder::new(file, GzLevel::default()));
                builder.append_dir_all(&arcname, install_path)?;
                builder.into_inner()?.finish()?;
            }
            Compression::Xz => {
                let mut builder = tar::Builder::new(XzEncoder::new(file, 6));
                builder.append_dir_all(&arcname, install_path)?;
                builder.into_inner()?.finish()?;
            }
        }

        let sha256 = compute_hash(&filepath, Algorithm::Sha256)?;
        let info = PkgInfo {
            name: name.to_string(),
            version: version.to_string(),
            arch: arch.to_string(),
            created_at: Utc::now().to_rfc3339(),
            install_path: install_path.display().to_string(),
            sha256,
            compress,
        };
        write_pkginfo(&self.sidecar_path(name, version, arch), &info)?;

        self.record(
            "create_binpkg",
            name,
            json!({ "version": version, "arch": arch, "file": filepath.display().to_string() }),
            "success",
        );
        print_debug(
            self.verbose,
            &format!("binary package created: {}", filepath.display()),
        );
        Ok(filepath)
    }

    /// Install a binary package.
    ///
    /// The tarball is located (missing tarball fails with NotFound),
    /// verified against its sidecar when one exists (mismatch fails with
    /// Integrity before anything is written), then extracted under
    /// `dest` — defaulting to the sandbox root, else `/`. The
    /// `pre_install`/`post_install` hooks bracket the extraction.
    #[allow(clippy::too_many_arguments)]
    pub fn install_binpkg(
        &self,
        name: &str,
        version: &str,
        arch: &str,
        dest: Option<&Path>,
        sandbox: Option<&Sandbox>,
        mut hooks: Option<&mut HookManager>,
        force: bool,
    ) -> Result<PathBuf> {
        let (tarball, compress) = self.locate(name, version, arch).ok_or_else(|| {
            Error::NotFound(format!(
                "binary package {}",
                Self::stem(name, version, arch)
            ))
        })?;

        let dest = dest
            .map(Path::to_path_buf)
            .or_else(|| sandbox.map(|s| s.root().to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("/"));

        let sidecar = self.sidecar_path(name, version, arch);
        if sidecar.exists() {
            let info = read_pkginfo(&sidecar)?;
            let actual = compute_hash(&tarball, Algorithm::Sha256)?;
            if !info.sha256.is_empty() && actual != info.sha256 {
                let message = format!(
                    "sha256 mismatch for {}: expected {}, got {}",
                    tarball.display(),
                    info.sha256,
                    actual
                );
                self.record("install_binpkg", name, json!({}), &format!("error: {message}"));
                return Err(Error::Integrity(message));
            }

            let unpacked_root = Path::new(&info.install_path)
                .file_name()
                .map(|n| dest.join(n));
            if let Some(existing) = unpacked_root {
                if existing.exists() && !force {
                    return Err(Error::Conflict(format!(
                        "{} already installed at {} (use force to overwrite)",
                        name,
                        existing.display()
                    )));
                }
            }
        }

        if let Some(hooks) = hooks.as_deref_mut() {
            run_stage_hooks(hooks, "pre_install", name, sandbox)?;
        }

        std::fs::create_dir_all(&dest)?;
        let file = std::fs::File::open(&tarball)?;
        match compress {
            Compression::Gz => tar::Archive::new(GzDecoder::new(file)).unpack(&dest)?,
            Compression::Xz => tar::Archive::new(XzDecoder::new(file)).unpack(&dest)?,
        }

        if let Some(hooks) = hooks.as_deref_mut() {
            run_stage_hooks(hooks, "post_install", name, sandbox)?;
        }

        self.record(
            "install_binpkg",
            name,
            json!({ "version": version, "arch": arch, "dest": dest.display().to_string() }),
            "success",
        );
        print_debug(
            self.verbose,
            &format!("{name}-{version} installed to {}", dest.display()),
        );
        Ok(dest)
    }

    /// Non-installing integrity check: both files present, the archive
    /// structurally sound, and the recorded checksum matching.
    pub fn validate_binpkg(&self, name: &str, version: &str, arch: &str) -> Result<bool> {
        let Some((tarball, compress)) = self.locate(name, version, arch) else {
            print_error(&format!(
                "binary package missing: {}",
                Self::stem(name, version, arch)
            ));
            return Ok(false);
        };
        let sidecar = self.sidecar_path(name, version, arch);
        if !sidecar.exists() {
            print_error(&format!("sidecar missing: {}", sidecar.display()));
            return Ok(false);
        }

        if !self.archive_is_sound(&tarball, compress) {
            print_error(&format!("malformed archive: {}", tarball.display()));
            return Ok(false);
        }

        let info = read_pkginfo(&sidecar)?;
        let actual = compute_hash(&tarball, Algorithm::Sha256)?;
        if actual != info.sha256 {
            print_error(&format!("sha256 mismatch for {}", tarball.display()));
            return Ok(false);
        }
        Ok(true)
    }

    /// Walk every entry to the end; any read failure marks the archive
    /// as unsound.
    fn archive_is_sound(&self, tarball: &Path, compress: Compression) -> bool {
        let Ok(file) = std::fs::File::open(tarball) else {
            return false;
        };
        let reader: Box<dyn Read> = match compress {
            Compression::Gz => Box::new(GzDecoder::new(file)),
            Compression::Xz => Box::new(XzDecoder::new(file)),
        };
        let mut archive = tar::Archive::new(reader);
        let Ok(entries) = archive.entries() else {
            return false;
        };
        for entry in entries {
            let Ok(mut entry) = entry else {
                return false;
            };
            if std::io::copy(&mut entry, &mut std::io::sink()).is_err() {
                return false;
            }
        }
        true
    }

    /// Sidecar projection over every package in the store.
    pub fn list_binpkgs(&self) -> Result<Vec<PkgInfo>> {
        let mut packages = Vec::new();
        for entry in std::fs::read_dir(&self.binpkg_dir)? {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pkginfo") {
                continue;
            }
            match read_pkginfo(&path) {
                Ok(info) => packages.push(info),
                Err(e) => print_error(&format!("unreadable sidecar {}: {e}", path.display())),
            }
        }
        packages.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        Ok(packages)
    }

    fn record(&self, action: &str, package: &str, details: serde_json::Value, status: &str) {
        let Some(history) = self.history else { return };
        if let Err(e) = history.record(action, package, details, status) {
            print_error(&format!("history append failed: {e}"));
        }
    }
}

fn run_stage_hooks(
    hooks: &mut HookManager,
    stage: &str,
    package: &str,
    sandbox: Option<&Sandbox>,
) -> Result<()> {
    let records = hooks.run_hooks(stage, Some(package), sandbox)?;
    if let Some(failed) = records.iter().find(|r| !r.is_success()) {
        return Err(Error::External(format!(
            "{stage} hook failed: {}",
            failed.status
        )));
    }
    Ok(())
}

fn read_pkginfo(path: &Path) -> Result<PkgInfo> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Invalid(format!("malformed sidecar {}: {e}", path.display())))
}

/// Sidecar files are 4-space-indented JSON.
fn write_pkginfo(path: &Path, info: &PkgInfo) -> Result<()> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    info.serialize(&mut serializer)?;
    std::fs::write(path, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use walkdir::WalkDir;

    fn stage_tree(temp: &TempDir) -> PathBuf {
        let stage = temp.path().join("stage");
        std::fs::create_dir_all(stage.join("bin")).unwrap();
        std::fs::write(stage.join("bin/foo"), vec![0u8; 100]).unwrap();
        std::fs::create_dir_all(stage.join("share/doc")).unwrap();
        std::fs::write(stage.join("share/doc/README"), "docs").unwrap();
        stage
    }

    fn store(temp: &TempDir) -> BinPkgStore<'static> {
        BinPkgStore::new(temp.path().join("binpkgs")).unwrap()
    }

    #[test]
    fn test_create_writes_tarball_and_sidecar() {
        let temp = TempDir::new().unwrap();
        let stage = stage_tree(&temp);
        let store = store(&temp);

        let tarball = store
            .create_binpkg("foo", "1.0", &stage, "x86_64", Compression::Gz)
            .unwrap();
        assert!(tarball.to_string_lossy().ends_with("foo-1.0-x86_64.tar.gz"));
        assert!(tarball.exists());

        let sidecar = temp.path().join("binpkgs/foo-1.0-x86_64.pkginfo");
        let raw = std::fs::read_to_string(&sidecar).unwrap();
        // 4-space indentation, exactly the documented keys
        assert!(raw.contains("\n    \"name\""));
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "name",
                "version",
                "arch",
                "created_at",
                "install_path",
                "sha256",
                "compress"
            ]
        );
        assert_eq!(value["compress"], "gz");
        assert_eq!(value["sha256"].as_str().unwrap().len(), 64);
    }

    fn assert_trees_identical(original: &Path, replayed: &Path) {
        for entry in WalkDir::new(original) {
            let entry = entry.unwrap();
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(original).unwrap();
            let replica = replayed.join(rel);
            assert!(replica.exists(), "missing {}", replica.display());
            assert_eq!(
                std::fs::read(entry.path()).unwrap(),
                std::fs::read(&replica).unwrap(),
                "content differs for {}",
                rel.display()
            );
        }
    }

    #[test]
    fn test_round_trip_reproduces_tree() {
        let temp = TempDir::new().unwrap();
        let stage = stage_tree(&temp);
        let store = store(&temp);

        store
            .create_binpkg("foo", "1.0", &stage, "x86_64", Compression::Gz)
            .unwrap();

        let dest = temp.path().join("fresh-dest");
        store
            .install_binpkg("foo", "1.0", "x86_64", Some(&dest), None, None, false)
            .unwrap();

        assert_trees_identical(&stage, &dest.join("stage"));
    }

    #[test]
    fn test_xz_round_trip() {
        let temp = TempDir::new().unwrap();
        let stage = stage_tree(&temp);
        let store = store(&temp);

        store
            .create_binpkg("foo", "1.0", &stage, "x86_64", Compression::Xz)
            .unwrap();
        let dest = temp.path().join("dest");
        store
            .install_binpkg("foo", "1.0", "x86_64", Some(&dest), None, None, false)
            .unwrap();
        assert_trees_identical(&stage, &dest.join("stage"));
    }

    #[test]
    fn test_truncated_tarball_fails_integrity() {
        let temp = TempDir::new().unwrap();
        let stage = stage_tree(&temp);
        let store = store(&temp);

        let tarball = store
            .create_binpkg("foo", "1.0", &stage, "x86_64", Compression::Gz)
            .unwrap();

        // truncate by one byte
        let bytes = std::fs::read(&tarball).unwrap();
        std::fs::write(&tarball, &bytes[..bytes.len() - 1]).unwrap();

        let dest = temp.path().join("dest");
        let result =
            store.install_binpkg("foo", "1.0", "x86_64", Some(&dest), None, None, false);
        assert!(matches!(result, Err(Error::Integrity(_))));
        assert!(!dest.exists(), "nothing may be extracted on mismatch");
    }

    #[test]
    fn test_missing_tarball_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let result = store.install_binpkg("ghost", "1.0", "x86_64", None, None, None, false);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_missing_sidecar_is_tolerated() {
        let temp = TempDir::new().unwrap();
        let stage = stage_tree(&temp);
        let store = store(&temp);

        store
            .create_binpkg("foo", "1.0", &stage, "x86_64", Compression::Gz)
            .unwrap();
        std::fs::remove_file(temp.path().join("binpkgs/foo-1.0-x86_64.pkginfo")).unwrap();

        let dest = temp.path().join("dest");
        store
            .install_binpkg("foo", "1.0", "x86_64", Some(&dest), None, None, false)
            .unwrap();
        assert!(dest.join("stage/bin/foo").exists());
    }

    #[test]
    fn test_reinstall_needs_force() {
        let temp = TempDir::new().unwrap();
        let stage = stage_tree(&temp);
        let store = store(&temp);

        store
            .create_binpkg("foo", "1.0", &stage, "x86_64", Compression::Gz)
            .unwrap();

        let dest = temp.path().join("dest");
        store
            .install_binpkg("foo", "1.0", "x86_64", Some(&dest), None, None, false)
            .unwrap();

        let again =
            store.install_binpkg("foo", "1.0", "x86_64", Some(&dest), None, None, false);
        assert!(matches!(again, Err(Error::Conflict(_))));

        store
            .install_binpkg("foo", "1.0", "x86_64", Some(&dest), None, None, true)
            .unwrap();
    }

    #[test]
    fn test_validate_binpkg() {
        let temp = TempDir::new().unwrap();
        let stage = stage_tree(&temp);
        let store = store(&temp);

        let tarball = store
            .create_binpkg("foo", "1.0", &stage, "x86_64", Compression::Gz)
            .unwrap();
        assert!(store.validate_binpkg("foo", "1.0", "x86_64").unwrap());

        // corrupt the payload
        let mut bytes = std::fs::read(&tarball).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        std::fs::write(&tarball, &bytes).unwrap();
        assert!(!store.validate_binpkg("foo", "1.0", "x86_64").unwrap());

        assert!(!store.validate_binpkg("ghost", "1.0", "x86_64").unwrap());
    }

    #[test]
    fn test_install_runs_hooks() {
        use crate::hooks::{Hook, HookAction};
        use std::cell::RefCell;
        use std::rc::Rc;

        let temp = TempDir::new().unwrap();
        let stage = stage_tree(&temp);
        let store = store(&temp);
        store
            .create_binpkg("foo", "1.0", &stage, "x86_64", Compression::Gz)
            .unwrap();

        let log = Rc::new(RefCell::new(Vec::new()));
        let mut hooks = HookManager::new();
        for stage_name in ["pre_install", "post_install"] {
            let log = log.clone();
            hooks.register_hook(Hook::new(
                stage_name,
                HookAction::Native(Box::new(move |_| {
                    log.borrow_mut().push(stage_name);
                    Ok(())
                })),
            ));
        }

        let dest = temp.path().join("dest");
        store
            .install_binpkg(
                "foo",
                "1.0",
                "x86_64",
                Some(&dest),
                None,
                Some(&mut hooks),
                false,
            )
            .unwrap();
        assert_eq!(*log.borrow(), vec!["pre_install", "post_install"]);
    }

    #[test]
    fn test_list_binpkgs() {
        let temp = TempDir::new().unwrap();
        let stage = stage_tree(&temp);
        let store = store(&temp);

        store
            .create_binpkg("foo", "1.0", &stage, "x86_64", Compression::Gz)
            .unwrap();
        store
            .create_binpkg("bar", "2.1", &stage, "x86_64", Compression::Xz)
            .unwrap();

        let listing = store.list_binpkgs().unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].name, "bar");
        assert_eq!(listing[1].name, "foo");
        assert_eq!(listing[1].compress, Compression::Gz);
    }
}
