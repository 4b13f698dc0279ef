//! 自然语言处理模块，将用户自然语言描述转换为 /nai 指令参数。

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::config::PromptTemplates;
use crate::llm::LlmClient;
use crate::parser::parse_generation_command;

/// 自然语言处理结果。
#[derive(Debug, Clone)]
pub struct NlProcessResult {
    /// 可直接拼到 `/nai ` 后面的参数文本
    pub params_text: String,
    /// 实际使用的 LLM 模型
    pub model_name: Option<String>,
}

const DEFAULT_DETAIL_CHECK: &str = "你是一个图像生成提示词评估助手。\
请判断下面的用户描述是否已经包含明确的主体、足够的细节、背景和构图信息。\
只回复\"详细\"或\"不详细\"，不要添加任何其他文字。\n\n用户描述：{user_input}";

const DEFAULT_EXPAND: &str = "你是一个AI图像生成提示词助手。用户提供了一个详细的图像描述，\
请将其转换为 danbooru 风格的英文提示词，按主体、特征、动作、服装、背景、风格的顺序用逗号分隔。\
不要附加质量词（如 best quality、masterpiece），不要添加负面词条或分辨率等参数，\
只输出转换后的英文提示词。\n\n用户描述：{user_input}";

const DEFAULT_TRANSLATE: &str = "你是一个AI图像生成提示词助手。用户提供了一个简单的图像描述，\
请将其翻译为英文并合理扩展为 danbooru 风格的提示词，补充主体特征、构图、背景等必要细节，\
用逗号分隔。不要附加质量词（如 best quality、masterpiece），\
只输出翻译并扩展后的英文提示词。\n\n用户描述：{user_input}";

/// 自然语言处理器。
pub struct NlProcessor {
    llm: Box<dyn LlmClient>,
    templates: PromptTemplates,
}

impl NlProcessor {
    pub fn new(llm: Box<dyn LlmClient>, templates: PromptTemplates) -> Self {
        Self { llm, templates }
    }

    /// 处理自然语言输入，返回已通过解析校验的 /nai 参数文本。
    pub async fn process(
        &self,
        user_input: &str,
        auto_add_quality_words: bool,
        quality_words: &str,
    ) -> Result<NlProcessResult> {
        let user_input = user_input.trim();
        if user_input.is_empty() {
            anyhow::bail!("输入不能为空");
        }

        let detailed = self.check_detail(user_input).await;
        let template = if detailed {
            debug!("用户描述较详细，使用扩写模板");
            pick(&self.templates.expand, DEFAULT_EXPAND)
        } else {
            debug!("用户描述较简单，使用翻译扩展模板");
            pick(&self.templates.translate, DEFAULT_TRANSLATE)
        };

        let prompt = template.replace("{user_input}", user_input);
        let response = self.llm.generate(&prompt).await.context("LLM 调用失败")?;

        let mut positive_prompt = extract_positive_prompt(&response)?;

        if auto_add_quality_words {
            let quality_words = quality_words.trim().trim_matches(',').trim();
            if !quality_words.is_empty() {
                let lower = positive_prompt.to_lowercase();
                if !lower.contains("best quality") && !lower.contains("masterpiece") {
                    positive_prompt = format!("{positive_prompt}, {quality_words}");
                }
            }
        }

        let params_text = format!("正面词条:<{positive_prompt}>");
        parse_generation_command(&format!("/nai {params_text}")).with_context(|| {
            format!(
                "生成的参数格式验证失败，正面词条: {}",
                positive_prompt.chars().take(200).collect::<String>()
            )
        })?;

        Ok(NlProcessResult {
            params_text,
            model_name: self.llm.last_used_model(),
        })
    }

    /// 判断描述是否详细。LLM 不可用时退回长度启发式。
    async fn check_detail(&self, user_input: &str) -> bool {
        let template = pick(&self.templates.detail_check, DEFAULT_DETAIL_CHECK);
        let prompt = template.replace("{user_input}", user_input);
        match self.llm.generate(&prompt).await {
            Ok(response) => {
                let response = response.trim().to_lowercase();
                if response.contains("不详细") {
                    false
                } else {
                    response.contains("详细") || response.contains("detailed")
                }
            }
            Err(error) => {
                warn!("详细度检查失败: {error}，默认使用简单判断");
                length_heuristic(user_input)
            }
        }
    }
}

fn pick<'a>(configured: &'a str, fallback: &'a str) -> &'a str {
    if configured.trim().is_empty() { fallback } else { configured }
}

fn length_heuristic(input: &str) -> bool {
    input.split_whitespace().count() > 10 || input.chars().count() > 50
}

fn strip_code_blocks(s: &str) -> &str {
    let s = s.trim();
    let s = s
        .strip_prefix("```json")
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}

/// 从 LLM 响应中提取正面词条文本。
///
/// 模型偶尔会带解释性前后缀、代码块或把结果包在 `正面词条:<...>` 里，
/// 逐层剥掉后返回干净的词条。
fn extract_positive_prompt(response: &str) -> Result<String> {
    let mut cleaned = strip_code_blocks(response).to_string();

    // 整段包在 正面词条:<...> 里的情况最优先
    if let Some(inner) = extract_tagged_value(&cleaned) {
        cleaned = inner;
    }

    let prefixes = [
        "以下是转换后的提示词：",
        "转换后的提示词如下：",
        "根据您的要求，",
        "Here is the converted prompt:",
        "The converted prompt is:",
        "正面词条:",
        "正面词条：",
        "Positive prompt:",
        "Prompt:",
    ];
    for prefix in prefixes {
        let lower = cleaned.to_lowercase();
        if lower.starts_with(&prefix.to_lowercase()) {
            cleaned = cleaned[prefix.len()..].trim().to_string();
        }
    }

    let suffixes = ["以上是转换后的提示词。", "This is the converted prompt.", "。", "."];
    for suffix in suffixes {
        let lower = cleaned.to_lowercase();
        if lower.ends_with(&suffix.to_lowercase()) {
            cleaned = cleaned[..cleaned.len() - suffix.len()].trim().to_string();
        }
    }

    let cleaned = cleaned
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim()
        .to_string();

    // 多行响应只保留词条内容，跳过明显的说明行
    let skip_keywords = ["要求", "requirement", "note", "注意", "please", "用户描述", "user input"];
    let lines: Vec<&str> = cleaned
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let lower = line.to_lowercase();
            !skip_keywords.iter().any(|k| lower.contains(k))
        })
        .collect();
    let joined = if lines.is_empty() { cleaned } else { lines.join(" ") };

    let normalized = joined.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        anyhow::bail!("无法从 LLM 响应中提取有效的正面词条");
    }
    Ok(normalized)
}

/// 在文本里找 `正面词条:<...>` 并取出尖括号内的内容。
fn extract_tagged_value(text: &str) -> Option<String> {
    let key_at = text.find("正面词条")?;
    let rest = &text[key_at + "正面词条".len()..];
    let rest = rest.strip_prefix('：').or_else(|| rest.strip_prefix(':'))?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('<')?;
    let close = rest.find('>')?;
    let inner = rest[..close].trim();
    if inner.is_empty() { None } else { Some(inner.to_string()) }
}
