//! USE flag queries over repository profiles
//!
//! Reads the global flag descriptions (`profiles/use.desc`) and
//! per-package assignments (`profiles/package.use/<pkg>`) out of the
//! repository roots, with per-key JSON sidecar caching. Flag writes go
//! into the sandbox only, never onto the real system.

use crate::error::{Error, Result};
use crate::sandbox::Sandbox;
use crate::utils::output::print_debug;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Default query cache location.
pub const DEFAULT_QUERY_CACHE: &str = "/var/cache/source/query";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryEvent {
    pub timestamp: String,
    pub action: String,
    pub detail: Value,
}

pub struct UseQuery<'a> {
    repo_paths: Vec<PathBuf>,
    sandbox: Option<&'a Sandbox>,
    cache_dir: PathBuf,
    verbose: bool,
    events: Vec<QueryEvent>,
}

impl<'a> UseQuery<'a> {
    pub fn new(repo_paths: Vec<PathBuf>, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self {
            repo_paths,
            sandbox: None,
            cache_dir,
            verbose: false,
            events: Vec::new(),
        })
    }

    pub fn with_sandbox(mut self, sandbox: &'a Sandbox) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn cache_file(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{key}.json"))
    }

    fn load_cached(&self, key: &str) -> Option<Value> {
        let path = self.cache_file(key);
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn save_cached(&self, key: &str, data: &Value) -> Result<()> {
        std::fs::write(self.cache_file(key), serde_json::to_string_pretty(data)?)?;
        Ok(())
    }

    fn log_event(&mut self, action: &str, detail: Value) {
        self.events.push(QueryEvent {
            timestamp: Utc::now().to_rfc3339(),
            action: action.to_string(),
            detail,
        });
    }

    /// Every flag declared in any repository's `profiles/use.desc`.
    pub fn list_all_flags(&mut self) -> Result<Vec<String>> {
        if let Some(cached) = self.load_cached("all_flags") {
            print_debug(self.verbose, "using cached flag list");
            if let Ok(flags) = serde_json::from_value::<Vec<String>>(cached) {
                return Ok(flags);
            }
        }

        let mut all_flags = BTreeSet::new();
        for repo in &self.repo_paths {
            let use_desc = repo.join("profiles").join("use.desc");
            let Ok(content) = std::fs::read_to_string(&use_desc) else {
                continue;
            };
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some(flag) = line.split_whitespace().next() {
                    all_flags.insert(flag.to_string());
                }
            }
        }

        let flags: Vec<String> = all_flags.into_iter().collect();
        self.save_cached("all_flags", &serde_json::to_value(&flags)?)?;
        Ok(flags)
    }

    /// `flag=value` assignments for one package across the repositories.
    pub fn list_package_flags(&mut self, package: &str) -> Result<BTreeMap<String, String>> {
        let mut package_flags = BTreeMap::new();
        for repo in &self.repo_paths {
            let path = repo.join("profiles").join("package.use").join(package);
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            for line in content.lines() {
                if let Some((flag, value)) = line.trim().split_once('=') {
                    package_flags.insert(flag.to_string(), value.to_string());
                }
            }
        }

        self.log_event(
            "list_package_flags",
            serde_json::json!({ "package": package, "result": package_flags }),
        );
        Ok(package_flags)
    }

    /// The declared status of one flag from `use.desc`, when present.
    pub fn check_flag_status(&mut self, flag: &str) -> Result<Option<String>> {
        for repo in &self.repo_paths {
            let use_desc = repo.join("profiles").join("use.desc");
            let Ok(content) = std::fs::read_to_string(&use_desc) else {
                continue;
            };
            for line in content.lines() {
                if line.starts_with(flag) {
                    let status = line
                        .split_whitespace()
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    self.log_event(
                        "check_flag_status",
                        serde_json::json!({ "flag": flag, "status": status }),
                    );
                    return Ok(Some(status));
                }
            }
        }
        Ok(None)
    }

    /// Write a per-package flag assignment — into the sandbox only.
    pub fn set_package_flag(&mut self, package: &str, flag: &str, value: &str) -> Result<()> {
        let Some(sandbox) = self.sandbox else {
            return Err(Error::Invalid(
                "flag writes require a configured sandbox".to_string(),
            ));
        };

        let package_path = sandbox.root().join("package.use").join(package);
        if let Some(parent) = package_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut flags = BTreeMap::new();
        if let Ok(content) = std::fs::read_to_string(&package_path) {
            for line in content.lines() {
                if let Some((k, v)) = line.trim().split_once('=') {
                    flags.insert(k.to_string(), v.to_string());
                }
            }
        }
        flags.insert(flag.to_string(), value.to_string());

        let mut out = String::new();
        for (k, v) in &flags {
            out.push_str(&format!("{k}={v}\n"));
        }
        std::fs::write(&package_path, out)?;

        self.log_event(
            "set_package_flag",
            serde_json::json!({ "package": package, "flag": flag, "value": value }),
        );
        print_debug(
            self.verbose,
            &format!("flag {flag} for {package} set to {value} in sandbox"),
        );
        Ok(())
    }

    /// Declared flags the package does not assign yet.
    pub fn suggest_flags(&mut self, package: &str) -> Result<Vec<String>> {
        let package_flags = self.list_package_flags(package)?;
        let all_flags = self.list_all_flags()?;
        let suggested: Vec<String> = all_flags
            .into_iter()
            .filter(|flag| !package_flags.contains_key(flag))
            .collect();

        self.log_event(
            "suggest_flags",
            serde_json::json!({ "package": package, "suggested": suggested }),
        );
        Ok(suggested)
    }

    pub fn events(&self) -> &[QueryEvent] {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_use_desc(repo: &Path, lines: &[&str]) {
        let profiles = repo.join("profiles");
        std::fs::create_dir_all(&profiles).unwrap();
        std::fs::write(profiles.join("use.desc"), lines.join("\n")).unwrap();
    }

    fn query<'a>(temp: &TempDir) -> UseQuery<'a> {
        UseQuery::new(vec![temp.path().join("repo")], temp.path().join("qcache")).unwrap()
    }

    #[test]
    fn test_list_all_flags_parses_use_desc() {
        let temp = TempDir::new().unwrap();
        write_use_desc(
            &temp.path().join("repo"),
            &[
                "# comment line",
                "ssl - enable TLS support",
                "ipv6 - enable IPv6",
                "",
            ],
        );

        let mut q = query(&temp);
        assert_eq!(q.list_all_flags().unwrap(), vec!["ipv6", "ssl"]);
    }

    #[test]
    fn test_list_all_flags_is_cached() {
        let temp = TempDir::new().unwrap();
        write_use_desc(&temp.path().join("repo"), &["ssl - enable TLS"]);

        let mut q = query(&temp);
        assert_eq!(q.list_all_flags().unwrap(), vec!["ssl"]);

        // mutate the source file; the cached answer must win
        write_use_desc(&temp.path().join("repo"), &["zstd - enable zstd"]);
        assert_eq!(q.list_all_flags().unwrap(), vec!["ssl"]);
        assert!(temp.path().join("qcache/all_flags.json").exists());
    }

    #[test]
    fn test_list_package_flags() {
        let temp = TempDir::new().unwrap();
        let pkg_use = temp.path().join("repo/profiles/package.use");
        std::fs::create_dir_all(&pkg_use).unwrap();
        std::fs::write(pkg_use.join("curl"), "ssl=enabled\nbrotli=disabled\n").unwrap();

        let mut q = query(&temp);
        let flags = q.list_package_flags("curl").unwrap();
        assert_eq!(flags["ssl"], "enabled");
        assert_eq!(flags["brotli"], "disabled");
        assert!(q.list_package_flags("wget").unwrap().is_empty());
    }

    #[test]
    fn test_check_flag_status() {
        let temp = TempDir::new().unwrap();
        write_use_desc(
            &temp.path().join("repo"),
            &["ssl stable - TLS support", "bare"],
        );

        let mut q = query(&temp);
        assert_eq!(q.check_flag_status("ssl").unwrap().unwrap(), "stable");
        assert_eq!(q.check_flag_status("bare").unwrap().unwrap(), "unknown");
        assert!(q.check_flag_status("ghost").unwrap().is_none());
    }

    #[test]
    fn test_set_package_flag_requires_sandbox() {
        let temp = TempDir::new().unwrap();
        let mut q = query(&temp);
        assert!(matches!(
            q.set_package_flag("curl", "ssl", "enabled"),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn test_set_package_flag_writes_into_sandbox_only() {
        let temp = TempDir::new().unwrap();
        let sandbox = Sandbox::new(temp.path().join("stage")).unwrap();

        let mut q = query(&temp).with_sandbox(&sandbox);
        q.set_package_flag("curl", "ssl", "enabled").unwrap();
        q.set_package_flag("curl", "brotli", "disabled").unwrap();

        let written = sandbox.root().join("package.use/curl");
        let content = std::fs::read_to_string(&written).unwrap();
        assert!(content.contains("ssl=enabled"));
        assert!(content.contains("brotli=disabled"));
        // nothing lands outside the sandbox
        assert!(!temp.path().join("repo/profiles/package.use/curl").exists());
    }

    #[test]
    fn test_suggest_flags_excludes_assigned() {
        let temp = TempDir::new().unwrap();
        write_use_desc(
            &temp.path().join("repo"),
            &["ssl - TLS", "ipv6 - v6", "zstd - zstd"],
        );
        let pkg_use = temp.path().join("repo/profiles/package.use");
        std::fs::create_dir_all(&pkg_use).unwrap();
        std::fs::write(pkg_use.join("curl"), "ssl=enabled\n").unwrap();

        let mut q = query(&temp);
        assert_eq!(q.suggest_flags("curl").unwrap(), vec!["ipv6", "zstd"]);
    }

    #[test]
    fn test_events_are_recorded() {
        let temp = TempDir::new().unwrap();
        write_use_desc(&temp.path().join("repo"), &["ssl - TLS"]);
        let mut q = query(&temp);
        q.list_package_flags("curl").unwrap();
        q.check_flag_status("ssl").unwrap();

        let actions: Vec<&str> = q.events().iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["list_package_flags", "check_flag_status"]);
    }
}
