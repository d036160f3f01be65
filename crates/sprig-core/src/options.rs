use std::env;

use serde::Deserialize;

use crate::error::SprigError;

fn env_flag(name: &str) -> Option<bool> {
    let value = env::var(name).ok()?;
    Some(matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    ))
}

fn env_int(name: &str) -> Option<i32> {
    env::var(name).ok()?.trim().parse().ok()
}

/// Relink budgets per inline-cache stage. A value of zero or below disables the
/// stage: the call site skips straight past it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CallSiteThresholds {
    pub monomorphic: i32,
    pub polymorphic: i32,
    pub megamorphic: i32,
}

impl Default for CallSiteThresholds {
    fn default() -> Self {
        Self {
            monomorphic: 4,
            polymorphic: 8,
            megamorphic: 64,
        }
    }
}

impl CallSiteThresholds {
    pub fn from_env() -> Self {
        let base = CallSiteThresholds::default();
        Self {
            monomorphic: env_int("SPRIG_IC_MONO").unwrap_or(base.monomorphic),
            polymorphic: env_int("SPRIG_IC_POLY").unwrap_or(base.polymorphic),
            megamorphic: env_int("SPRIG_IC_MEGA").unwrap_or(base.megamorphic),
        }
    }

    /// Every stage disabled: sites go straight to the generic target.
    pub fn unoptimized() -> Self {
        Self {
            monomorphic: 0,
            polymorphic: 0,
            megamorphic: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompilerOptions {
    pub call_sites: CallSiteThresholds,
    pub verify_classes: bool,
    pub warn_on_hint_mismatch: bool,
    pub print_warnings: bool,
    pub source_name: Option<String>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            call_sites: CallSiteThresholds::from_env(),
            verify_classes: env_flag("SPRIG_VERIFY").unwrap_or(true),
            warn_on_hint_mismatch: env_flag("SPRIG_WARN_HINTS").unwrap_or(true),
            print_warnings: false,
            source_name: None,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct OptionsFile {
    call_sites: Option<CallSiteThresholds>,
    compiler: Option<CompilerSection>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct CompilerSection {
    verify_classes: Option<bool>,
    warn_on_hint_mismatch: Option<bool>,
    print_warnings: Option<bool>,
    source_name: Option<String>,
}

impl CompilerOptions {
    /// Overlays a TOML document on top of the defaults:
    ///
    /// ```toml
    /// [call_sites]
    /// monomorphic = 2
    ///
    /// [compiler]
    /// verify_classes = false
    /// ```
    pub fn from_toml_str(src: &str) -> Result<Self, SprigError> {
        let file: OptionsFile = toml::from_str(src)
            .map_err(|err| SprigError::runtime(format!("invalid compiler options: {}", err)))?;
        let mut opts = CompilerOptions::default();
        if let Some(call_sites) = file.call_sites {
            opts.call_sites = call_sites;
        }
        if let Some(section) = file.compiler {
            if let Some(v) = section.verify_classes {
                opts.verify_classes = v;
            }
            if let Some(v) = section.warn_on_hint_mismatch {
                opts.warn_on_hint_mismatch = v;
            }
            if let Some(v) = section.print_warnings {
                opts.print_warnings = v;
            }
            if section.source_name.is_some() {
                opts.source_name = section.source_name;
            }
        }
        Ok(opts)
    }

    pub fn with_thresholds(mut self, call_sites: CallSiteThresholds) -> Self {
        self.call_sites = call_sites;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overlays_defaults() -> Result<(), SprigError> {
        let opts = CompilerOptions::from_toml_str(
            "[call_sites]\nmonomorphic = 1\npolymorphic = -1\n\n[compiler]\nverify_classes = false\n",
        )?;
        assert_eq!(opts.call_sites.monomorphic, 1);
        assert_eq!(opts.call_sites.polymorphic, -1);
        assert_eq!(opts.call_sites.megamorphic, CallSiteThresholds::default().megamorphic);
        assert!(!opts.verify_classes);
        Ok(())
    }

    #[test]
    fn bad_toml_is_reported() {
        assert!(CompilerOptions::from_toml_str("[call_sites\n").is_err());
    }
}
