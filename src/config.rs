use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::MODELS;

pub const CONFIG_PATH: &str = "config.yml";

/// 配置文件模板，首次运行时落盘。
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# prompt2image 配置模板

# NovelAI API访问Token，登陆NovelAI后抓取。
nai_token: ""

# HTTP代理，可选。如需走代理，填写例如 http://127.0.0.1:7890
proxy: ""

# 默认模型，可选值：
# - nai-diffusion-4-5-full
# - nai-diffusion-4-5-curated
# - nai-diffusion-4-full
# - nai-diffusion-4-curated-preview
# - nai-diffusion-3
# - nai-diffusion-furry-3
default_model: "nai-diffusion-4-5-curated"

# 图像保存路径
image_save_path: "outputs"

# 白名单存储路径
whitelist_path: "data/whitelist.json"

# 默认每日调用次数上限（白名单用户可单独配置）。
default_daily_limit: 10

# 质量词，自然语言模式下自动追加
quality_words: "best quality, masterpiece"

# 队列相邻请求之间的随机延迟范围（秒）
min_delay: 3.0
max_delay: 5.0

# 自然语言处理设置（/nainl 功能），不需要可整段删除
#nl:
#  api_key: ""
#  models:
#    - "openai/gpt-4o-mini"
#    - "anthropic/claude-3-haiku"
#  timeout: 30
"#;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub nai_token: String,

    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_image_save_path")]
    pub image_save_path: String,

    #[serde(default = "default_whitelist_path")]
    pub whitelist_path: String,

    #[serde(default = "default_daily_limit")]
    pub default_daily_limit: u32,

    #[serde(default = "default_quality_words")]
    pub quality_words: String,

    #[serde(default = "default_min_delay")]
    pub min_delay: f64,

    #[serde(default = "default_max_delay")]
    pub max_delay: f64,

    pub nl: Option<NlConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NlConfig {
    pub api_key: String,

    #[serde(default = "default_nl_models")]
    pub models: Vec<String>,

    #[serde(default = "default_nl_timeout")]
    pub timeout: u64,

    pub http_referer: Option<String>,
    pub x_title: Option<String>,

    /// 为空则使用全局 quality_words
    #[serde(default)]
    pub quality_words_override: String,

    /// 非空时在 NL 生成的指令后追加负面词条
    #[serde(default)]
    pub negative_preset_override: String,

    #[serde(default)]
    pub prompt_templates: PromptTemplates,
}

impl Default for NlConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            models: default_nl_models(),
            timeout: default_nl_timeout(),
            http_referer: None,
            x_title: None,
            quality_words_override: String::new(),
            negative_preset_override: String::new(),
            prompt_templates: PromptTemplates::default(),
        }
    }
}

/// /nainl 用的三段提示词模板，留空则使用内置版本。
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PromptTemplates {
    #[serde(default)]
    pub detail_check: String,
    #[serde(default)]
    pub expand: String,
    #[serde(default)]
    pub translate: String,
}

fn default_model() -> String {
    "nai-diffusion-4-5-curated".to_string()
}
fn default_image_save_path() -> String {
    "outputs".to_string()
}
fn default_whitelist_path() -> String {
    "data/whitelist.json".to_string()
}
fn default_daily_limit() -> u32 {
    10
}
fn default_quality_words() -> String {
    "best quality, masterpiece".to_string()
}
fn default_min_delay() -> f64 {
    3.0
}
fn default_max_delay() -> f64 {
    5.0
}
fn default_nl_models() -> Vec<String> {
    vec![
        "openai/gpt-4o-mini".to_string(),
        "anthropic/claude-3-haiku".to_string(),
    ]
}
fn default_nl_timeout() -> u64 {
    30
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_PATH))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        if !MODELS.contains(&config.default_model.as_str()) {
            anyhow::bail!("模型无效: {}", config.default_model);
        }
        Ok(config)
    }

    /// 配置文件不存在时写出默认模板。
    pub fn ensure_default(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::write(path, DEFAULT_CONFIG_TEMPLATE)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.image_save_path)?;
        if let Some(parent) = Path::new(&self.whitelist_path).parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_yaml_gets_defaults() {
        let config: Config = serde_yaml_ng::from_str("nai_token: \"abc\"\n").unwrap();
        assert_eq!(config.nai_token, "abc");
        assert_eq!(config.default_model, "nai-diffusion-4-5-curated");
        assert_eq!(config.image_save_path, "outputs");
        assert_eq!(config.default_daily_limit, 10);
        assert_eq!(config.quality_words, "best quality, masterpiece");
        assert_eq!(config.min_delay, 3.0);
        assert_eq!(config.max_delay, 5.0);
        assert!(config.nl.is_none());
    }

    #[test]
    fn test_nl_section_parses() {
        let yaml = r#"
nai_token: "abc"
nl:
  api_key: "sk-or-xxx"
  models:
    - "openai/gpt-4o"
  negative_preset_override: "lowres"
"#;
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
        let nl = config.nl.unwrap();
        assert_eq!(nl.api_key, "sk-or-xxx");
        assert_eq!(nl.models, vec!["openai/gpt-4o".to_string()]);
        assert_eq!(nl.timeout, 30);
        assert_eq!(nl.negative_preset_override, "lowres");
        assert!(nl.prompt_templates.detail_check.is_empty());
    }

    #[test]
    fn test_invalid_default_model_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, "nai_token: \"abc\"\ndefault_model: \"sdxl\"\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_default_template_is_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        Config::ensure_default(&path).unwrap();
        let config = Config::load_from(&path).unwrap();
        assert!(config.nai_token.is_empty());
        assert_eq!(config.default_model, "nai-diffusion-4-5-curated");
    }
}
