//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WREN__*` 覆盖
//! （双下划线表示嵌套，如 `WREN__SIMULATOR__SEED=7`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub simulator: SimulatorSection,
}

/// [agent] 段：语言环境与上下文裁剪
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            locale: default_locale(),
            timezone: default_timezone(),
        }
    }
}

fn default_locale() -> String {
    "en-US".to_string()
}

fn default_timezone() -> String {
    "America/Los_Angeles".to_string()
}

/// [simulator] 段：模拟执行器的种子与错误注入
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorSection {
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// 关闭后模拟执行不再随机注入失败（测试数据需要稳定结果时用）
    #[serde(default = "default_simulate_errors")]
    pub simulate_errors: bool,
    /// 输出参数名 -> 强制值
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

impl Default for SimulatorSection {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            simulate_errors: default_simulate_errors(),
            overrides: HashMap::new(),
        }
    }
}

fn default_seed() -> u64 {
    42
}

fn default_simulate_errors() -> bool {
    true
}

/// 加载配置：TOML 文件（可选）+ `WREN__*` 环境变量覆盖
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WREN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = load_config(None).expect("defaults should load");
        assert_eq!(config.agent.locale, "en-US");
        assert_eq!(config.simulator.seed, 42);
        assert!(config.simulator.simulate_errors);
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wren.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[agent]\nlocale = \"zh-CN\"\n\n[simulator]\nseed = 7\nsimulate_errors = false\n"
        )
        .unwrap();

        let config = load_config(Some(path)).unwrap();
        assert_eq!(config.agent.locale, "zh-CN");
        assert_eq!(config.simulator.seed, 7);
        assert!(!config.simulator.simulate_errors);
    }
}
