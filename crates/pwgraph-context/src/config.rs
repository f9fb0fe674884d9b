//! Context configuration (spec §6 "Configuration (consumed by the
//! core)"), loaded from TOML.

use crate::error::{ContextError, ContextResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

bitflags::bitflags! {
    /// Per-entry flags on a `context.modules` / `context.objects` line
    /// (spec §6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EntryFlags: u32 {
        /// Missing the factory/module is not an error, just skip it.
        const IF_EXISTS = 1 << 0;
        /// Load failure is logged and skipped rather than aborting the
        /// enclosing module (spec §7 "Plugin-load failures with `nofail`
        /// flag are logged and skipped").
        const NO_FAIL = 1 << 1;
    }
}

impl EntryFlags {
    /// Parse the `flags = [...]` string list spec §6 describes
    /// (`ifexists`, `nofail`); unrecognized tokens are ignored.
    #[must_use]
    pub fn from_tokens(tokens: &[String]) -> Self {
        let mut flags = Self::empty();
        for token in tokens {
            match token.as_str() {
                "ifexists" => flags |= Self::IF_EXISTS,
                "nofail" => flags |= Self::NO_FAIL,
                _ => {}
            }
        }
        flags
    }
}

/// A single `key = value` condition matched against context properties
/// (spec §6 "`condition` (matched against context properties)").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConditionSpec {
    /// Property key to look up.
    pub key: String,
    /// Value the property must equal for the condition to hold.
    pub value: String,
}

/// Evaluate a set of conditions against `props`: all must match (empty
/// list always matches).
#[must_use]
pub fn conditions_match(conditions: &[ConditionSpec], props: &HashMap<String, String>) -> bool {
    conditions
        .iter()
        .all(|c| props.get(&c.key).is_some_and(|v| v == &c.value))
}

/// One `context.data-loops` entry (spec §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataLoopSpec {
    /// `loop.name`.
    #[serde(rename = "loop.name")]
    pub name: String,
    /// `loop.class`, e.g. `"audio.rt"` / `"video.rt"`.
    #[serde(rename = "loop.class", default)]
    pub class: Option<String>,
    /// `thread.affinity`: a CPU core index to pin to.
    #[serde(rename = "thread.affinity", default)]
    pub affinity: Option<usize>,
    /// `thread.priority`: requested `SCHED_FIFO` priority.
    #[serde(rename = "thread.priority", default)]
    pub priority: Option<i32>,
}

/// One `context.modules` entry (spec §6).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ModuleSpec {
    /// Module name to load.
    pub name: String,
    /// Arguments passed to the module's constructor.
    #[serde(default)]
    pub args: HashMap<String, String>,
    /// Conditions gating whether this entry loads at all.
    #[serde(default)]
    pub condition: Vec<ConditionSpec>,
    /// `ifexists` / `nofail` flags as raw tokens (parse with
    /// [`EntryFlags::from_tokens`]).
    #[serde(default)]
    pub flags: Vec<String>,
}

/// One `context.objects` entry (spec §6): a SPA factory to instantiate at
/// startup.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ObjectSpec {
    /// Factory name, matched against `context.spa-libs`.
    pub factory: String,
    /// Arguments passed to the factory's constructor.
    #[serde(default)]
    pub args: HashMap<String, String>,
    /// Conditions gating whether this entry is instantiated.
    #[serde(default)]
    pub condition: Vec<ConditionSpec>,
    /// `ifexists` / `nofail` flags as raw tokens.
    #[serde(default)]
    pub flags: Vec<String>,
}

/// One `context.exec` entry (spec §6): an external helper process to run
/// at startup.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ExecSpec {
    /// Path of the executable.
    pub path: String,
    /// Arguments passed to it.
    #[serde(default)]
    pub args: Vec<String>,
}

/// The full config tree a [`crate::context::Context`] is built from (spec
/// §6).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ContextConfig {
    /// `context.properties`.
    #[serde(rename = "context.properties", default)]
    pub properties: HashMap<String, String>,
    /// `context.data-loops`.
    #[serde(rename = "context.data-loops", default)]
    pub data_loops: Vec<DataLoopSpec>,
    /// `context.spa-libs`: factory-name-regex → library path.
    #[serde(rename = "context.spa-libs", default)]
    pub spa_libs: HashMap<String, String>,
    /// `context.modules`.
    #[serde(rename = "context.modules", default)]
    pub modules: Vec<ModuleSpec>,
    /// `context.objects`.
    #[serde(rename = "context.objects", default)]
    pub objects: Vec<ObjectSpec>,
    /// `context.exec`.
    #[serde(rename = "context.exec", default)]
    pub exec: Vec<ExecSpec>,
}

impl ContextConfig {
    /// Parse a config tree from TOML text.
    ///
    /// # Errors
    ///
    /// [`ContextError::ParseConfig`] on malformed TOML.
    pub fn from_str(text: &str) -> ContextResult<Self> {
        toml::from_str(text).map_err(ContextError::from)
    }

    /// Read and parse a config file.
    ///
    /// # Errors
    ///
    /// [`ContextError::ReadConfig`] if the file can't be read;
    /// [`ContextError::ParseConfig`] if it doesn't parse.
    pub fn from_path(path: &Path) -> ContextResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ContextError::read_config(path, e))?;
        Self::from_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [context.properties]
        "default.clock.rate" = "48000"
        "default.clock.quantum" = "1024"

        [[context.data-loops]]
        "loop.name" = "rt.audio"
        "loop.class" = "audio.rt"
        "thread.priority" = 88

        [context.spa-libs]
        "^audiotestsrc$" = "/usr/lib/spa/audiotestsrc/libspa-audiotestsrc.so"

        [[context.objects]]
        factory = "audiotestsrc"
        flags = ["nofail"]
    "#;

    #[test]
    fn parses_full_config_tree() {
        let config = ContextConfig::from_str(SAMPLE).unwrap();
        assert_eq!(config.properties.get("default.clock.rate").unwrap(), "48000");
        assert_eq!(config.data_loops.len(), 1);
        assert_eq!(config.data_loops[0].name, "rt.audio");
        assert_eq!(config.data_loops[0].priority, Some(88));
        assert_eq!(config.objects.len(), 1);
        assert_eq!(config.objects[0].factory, "audiotestsrc");
    }

    #[test]
    fn entry_flags_parse_known_tokens() {
        let flags = EntryFlags::from_tokens(&["ifexists".to_string(), "nofail".to_string()]);
        assert!(flags.contains(EntryFlags::IF_EXISTS));
        assert!(flags.contains(EntryFlags::NO_FAIL));
    }

    #[test]
    fn conditions_match_requires_every_key() {
        let mut props = HashMap::new();
        props.insert("vm.running".to_string(), "false".to_string());
        let conditions = vec![ConditionSpec {
            key: "vm.running".to_string(),
            value: "false".to_string(),
        }];
        assert!(conditions_match(&conditions, &props));

        let conditions = vec![ConditionSpec {
            key: "vm.running".to_string(),
            value: "true".to_string(),
        }];
        assert!(!conditions_match(&conditions, &props));
    }

    #[test]
    fn from_path_reports_read_error_for_missing_file() {
        let err = ContextConfig::from_path(Path::new("/nonexistent/pwgraph-config-xyz.toml")).unwrap_err();
        assert!(matches!(err, ContextError::ReadConfig { .. }));
    }
}
