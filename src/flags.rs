//! USE flag store
//!
//! Global and per-package boolean feature toggles with named groups and
//! a change log, persisted as one JSON config file. Resolution order for
//! "is flag X on for package P": per-package override, else global, else
//! off.

use crate::error::Result;
use crate::utils::fsx::atomic_write;
use crate::utils::output::print_debug;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Default config location.
pub const DEFAULT_USE_CONF: &str = "/etc/source/use.conf";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlagChange {
    pub timestamp: String,
    pub action: String,
    pub flag: String,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct UseConfig {
    global_flags: BTreeMap<String, bool>,
    package_flags: BTreeMap<String, BTreeMap<String, bool>>,
    history: Vec<FlagChange>,
    groups: BTreeMap<String, BTreeSet<String>>,
}

/// Enabled-flag projection returned by `list_enabled_flags`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EnabledFlags {
    pub global: Vec<String>,
    pub packages: BTreeMap<String, Vec<String>>,
}

pub struct UseFlags {
    config_path: PathBuf,
    config: UseConfig,
    verbose: bool,
}

impl UseFlags {
    /// Load the store from `config_path`; a missing file yields an empty
    /// store.
    pub fn load(config_path: impl Into<PathBuf>) -> Result<Self> {
        let config_path = config_path.into();
        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            serde_json::from_str(&content)?
        } else {
            UseConfig::default()
        };
        Ok(Self {
            config_path,
            config,
            verbose: false,
        })
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.config)?;
        atomic_write(&self.config_path, content.as_bytes())?;
        print_debug(
            self.verbose,
            &format!("flags saved to {}", self.config_path.display()),
        );
        Ok(())
    }

    fn log_change(&mut self, action: &str, flag: &str, user: &str, package: Option<&str>) {
        self.config.history.push(FlagChange {
            timestamp: Utc::now().to_rfc3339(),
            action: action.to_string(),
            flag: flag.to_string(),
            user: user.to_string(),
            package: package.map(str::to_string),
        });
    }

    pub fn enable_global(&mut self, flag: &str, user: &str) -> Result<()> {
        self.config.global_flags.insert(flag.to_string(), true);
        self.log_change("enable_global", flag, user, None);
        self.save()
    }

    pub fn disable_global(&mut self, flag: &str, user: &str) -> Result<()> {
        self.config.global_flags.insert(flag.to_string(), false);
        self.log_change("disable_global", flag, user, None);
        self.save()
    }

    /// Replace the per-package flag overrides for one package.
    pub fn set_package_flags(
        &mut self,
        package: &str,
        flags: BTreeMap<String, bool>,
        user: &str,
    ) -> Result<()> {
        for (flag, enabled) in &flags {
            let action = if *enabled {
                "enable_package"
            } else {
                "disable_package"
            };
            self.log_change(action, flag, user, Some(package));
        }
        self.config.package_flags.insert(package.to_string(), flags);
        self.save()
    }

    pub fn is_flag_enabled(&self, flag: &str) -> bool {
        self.config.global_flags.get(flag).copied().unwrap_or(false)
    }

    /// Per-package override, else global, else off.
    pub fn is_package_flag_enabled(&self, package: &str, flag: &str) -> bool {
        self.config
            .package_flags
            .get(package)
            .and_then(|flags| flags.get(flag).copied())
            .unwrap_or_else(|| self.is_flag_enabled(flag))
    }

    /// The set of flags active for a package, ready for the resolver.
    pub fn active_flags_for(&self, package: &str) -> BTreeSet<String> {
        let mut active: BTreeSet<String> = self
            .config
            .global_flags
            .iter()
            .filter(|(_, on)| **on)
            .map(|(flag, _)| flag.clone())
            .collect();
        if let Some(overrides) = self.config.package_flags.get(package) {
            for (flag, on) in overrides {
                if *on {
                    active.insert(flag.clone());
                } else {
                    active.remove(flag);
                }
            }
        }
        active
    }

    pub fn list_enabled_flags(&self) -> EnabledFlags {
        EnabledFlags {
            global: self
                .config
                .global_flags
                .iter()
                .filter(|(_, on)| **on)
                .map(|(flag, _)| flag.clone())
                .collect(),
            packages: self
                .config
                .package_flags
                .iter()
                .filter(|(_, flags)| flags.values().any(|on| *on))
                .map(|(pkg, flags)| {
                    (
                        pkg.clone(),
                        flags
                            .iter()
                            .filter(|(_, on)| **on)
                            .map(|(flag, _)| flag.clone())
                            .collect(),
                    )
                })
                .collect(),
        }
    }

    /// Every known flag, enabled or not.
    pub fn list_all_flags(&self) -> EnabledFlags {
        EnabledFlags {
            global: self.config.global_flags.keys().cloned().collect(),
            packages: self
                .config
                .package_flags
                .iter()
                .map(|(pkg, flags)| (pkg.clone(), flags.keys().cloned().collect()))
                .collect(),
        }
    }

    pub fn register_group(&mut self, group: &str, flags: &[String]) -> Result<()> {
        self.config
            .groups
            .entry(group.to_string())
            .or_default()
            .extend(flags.iter().cloned());
        self.save()
    }

    pub fn enable_group(&mut self, group: &str, user: &str) -> Result<()> {
        for flag in self.config.groups.get(group).cloned().unwrap_or_default() {
            self.enable_global(&flag, user)?;
        }
        Ok(())
    }

    pub fn disable_group(&mut self, group: &str, user: &str) -> Result<()> {
        for flag in self.config.groups.get(group).cloned().unwrap_or_default() {
            self.disable_global(&flag, user)?;
        }
        Ok(())
    }

    /// Change log, optionally restricted to one package.
    pub fn get_history(&self, package: Option<&str>) -> Vec<&FlagChange> {
        self.config
            .history
            .iter()
            .filter(|c| package.map(|p| c.package.as_deref() == Some(p)).unwrap_or(true))
            .collect()
    }

    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.config)?)
    }

    pub fn import_json(&mut self, json: &str) -> Result<()> {
        self.config = serde_json::from_str(json)?;
        self.save()
    }
}
