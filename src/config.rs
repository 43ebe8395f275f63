use wasmtime::{Config, Engine, OptLevel};

const DEFAULT_MAX_STACK: usize = 8 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostConfig {
    /// Stack limit for wasm code, in bytes.
    pub max_wasm_stack: usize,
    /// Skip Cranelift optimizations when compiling modules.
    pub compile_fast: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_wasm_stack: DEFAULT_MAX_STACK,
            compile_fast: false,
        }
    }
}

impl HostConfig {
    /// Reads `HEXAGON_MAX_STACK` and `HEXAGON_COMPILE_FAST`.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_wasm_stack: var("HEXAGON_MAX_STACK")
                .and_then(|val| val.parse::<usize>().ok())
                .filter(|val| *val > 0)
                .unwrap_or(defaults.max_wasm_stack),
            compile_fast: var("HEXAGON_COMPILE_FAST").as_deref() == Some("1"),
        }
    }

    pub(crate) fn build_engine(&self) -> anyhow::Result<Engine> {
        let mut config = Config::new();
        config.max_wasm_stack(self.max_wasm_stack);
        if self.compile_fast {
            config.cranelift_opt_level(OptLevel::None);
        }
        log::debug!("wasm engine config: {self:?}");
        Engine::new(&config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> HostConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        HostConfig::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_env() {
        assert_eq!(from_pairs(&[]), HostConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let config = from_pairs(&[("HEXAGON_MAX_STACK", "65536"), ("HEXAGON_COMPILE_FAST", "1")]);
        assert_eq!(config.max_wasm_stack, 65536);
        assert!(config.compile_fast);
    }

    #[test]
    fn ignores_bad_stack_sizes() {
        assert_eq!(from_pairs(&[("HEXAGON_MAX_STACK", "0")]).max_wasm_stack, DEFAULT_MAX_STACK);
        assert_eq!(from_pairs(&[("HEXAGON_MAX_STACK", "big")]).max_wasm_stack, DEFAULT_MAX_STACK);
        assert!(!from_pairs(&[("HEXAGON_COMPILE_FAST", "yes")]).compile_fast);
    }

    #[test]
    fn builds_engine() {
        let config = HostConfig {
            compile_fast: true,
            ..HostConfig::default()
        };
        assert!(config.build_engine().is_ok());
    }
}
