use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use tracing::warn;

pub const DEFAULT_BUILDER: &str = "docker";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Resource limits forwarded to the builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerLimits {
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub memory_swap: Option<String>,
    #[serde(default)]
    pub cpu_shares: Option<String>,
    #[serde(default)]
    pub cpuset_cpus: Option<String>,
}

impl ContainerLimits {
    /// Read `STACKBUILD_MEMORY`, `STACKBUILD_MEMORY_SWAP`,
    /// `STACKBUILD_CPU_SHARES` and `STACKBUILD_CPUSET_CPUS`.
    pub fn from_env() -> Self {
        Self {
            memory: non_empty_var("STACKBUILD_MEMORY"),
            memory_swap: non_empty_var("STACKBUILD_MEMORY_SWAP"),
            cpu_shares: non_empty_var("STACKBUILD_CPU_SHARES"),
            cpuset_cpus: non_empty_var("STACKBUILD_CPUSET_CPUS"),
        }
    }

    /// Fill unset limits from `fallback`.
    pub fn or(self, fallback: ContainerLimits) -> Self {
        Self {
            memory: self.memory.or(fallback.memory),
            memory_swap: self.memory_swap.or(fallback.memory_swap),
            cpu_shares: self.cpu_shares.or(fallback.cpu_shares),
            cpuset_cpus: self.cpuset_cpus.or(fallback.cpuset_cpus),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub builder_bin: String,
    pub channel_capacity: usize,
    /// Parent of extracted archive workspaces; the system temp dir when unset.
    pub workspace_root: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            builder_bin: DEFAULT_BUILDER.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            workspace_root: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let builder_bin =
            non_empty_var("STACKBUILD_BUILDER").unwrap_or_else(|| DEFAULT_BUILDER.to_string());

        let channel_capacity = match non_empty_var("STACKBUILD_CHANNEL_CAPACITY") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(capacity) if capacity > 0 => capacity,
                _ => {
                    warn!(
                        value = %raw,
                        "Invalid STACKBUILD_CHANNEL_CAPACITY, using {}", DEFAULT_CHANNEL_CAPACITY
                    );
                    DEFAULT_CHANNEL_CAPACITY
                }
            },
            None => DEFAULT_CHANNEL_CAPACITY,
        };

        Self {
            builder_bin,
            channel_capacity,
            workspace_root: non_empty_var("STACKBUILD_WORKSPACE_DIR").map(PathBuf::from),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
