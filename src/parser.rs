//! 处理 /nai 图片生成指令的参数解析。

use std::collections::BTreeMap;

use thiserror::Error;

use crate::constants::{is_valid_position, resolution, DEFAULT_SAMPLER, DEFAULT_UC_PRESET, SAMPLERS};

/// 指令解析错误。Display 文本直接回复给用户。
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("指令格式错误，缺少/nai开头")]
    MissingPrefix,
    #[error("未填写提示词")]
    MissingPrompt,
    #[error("参数格式错误，请使用 Key:<Value> 格式")]
    MalformedPairs,
    #[error("未知参数: {0}")]
    UnknownKey(String),
    #[error("{0}参数无效，只能填写'是'或'否'")]
    InvalidBool(&'static str),
    #[error("{0}参数必须是数字")]
    NotANumber(&'static str),
    #[error("{0}参数必须是整数")]
    NotAnInteger(&'static str),
    #[error("{field}参数不能小于{min}")]
    TooSmall { field: &'static str, min: f64 },
    #[error("{field}参数不能大于{max}")]
    TooLarge { field: &'static str, max: f64 },
    #[error("分辨率参数无效")]
    InvalidResolution,
    #[error("采样器参数无效")]
    InvalidSampler,
    #[error("角色参数格式错误: {0}")]
    MalformedCharacterKey(String),
    #[error("角色序号仅支持1-5")]
    CharacterIndexOutOfRange,
    #[error("角色数量最多支持5个")]
    TooManyCharacters,
    #[error("角色{0}缺少正面词条")]
    CharacterMissingPrompt(u8),
    #[error("角色{0}位置参数无效")]
    InvalidCharacterPosition(u8),
}

/// 单个角色的生成参数。
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterPrompt {
    pub index: u8,
    pub positive: String,
    pub negative: Option<String>,
    pub position: String,
}

/// 一条指令解析校验后的全部参数。构造后不再修改。
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedParams {
    pub positive_prompt: String,
    pub negative_prompt: Option<String>,
    pub negative_preset: String,
    pub model_name: Option<String>,
    pub furry_mode: bool,
    pub add_quality_tags: bool,
    pub base_image: Option<String>,
    pub base_strength: f64,
    pub base_noise: f64,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance: f64,
    pub cfg_rescale: f64,
    pub seed: Option<u64>,
    pub sampler: String,
    pub use_character_zones: bool,
    pub characters: Vec<CharacterPrompt>,
    pub character_reference: Option<String>,
    pub character_reference_strength: f64,
    pub style_aware: bool,
}

const COMMAND_PREFIX: &str = "/nai";

const GENERAL_KEYS: [&str; 18] = [
    "正面词条",
    "负面词条",
    "是否有福瑞",
    "添加质量词",
    "底图",
    "底图重绘强度",
    "底图加噪强度",
    "分辨率",
    "步数",
    "指导系数",
    "重采样系数",
    "种子",
    "采样器",
    "角色是否分区",
    "角色参考",
    "角色参考强度",
    "是否注意原画风",
    "模型",
];

const CHARACTER_KEY_PREFIX: &str = "角色";
const CHARACTER_SUFFIXES: [&str; 3] = ["正面词条", "负面词条", "位置"];

fn parse_bool(value: Option<&str>, field: &'static str, default: bool) -> Result<bool, ParseError> {
    let Some(value) = value else { return Ok(default) };
    match value.trim() {
        "是" | "true" | "True" | "1" | "yes" | "YES" => Ok(true),
        "否" | "false" | "False" | "0" | "no" | "NO" => Ok(false),
        _ => Err(ParseError::InvalidBool(field)),
    }
}

fn parse_float(
    value: Option<&str>,
    field: &'static str,
    default: f64,
    min: f64,
    max: f64,
) -> Result<f64, ParseError> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };
    let number: f64 = value.parse().map_err(|_| ParseError::NotANumber(field))?;
    if number < min {
        return Err(ParseError::TooSmall { field, min });
    }
    if number > max {
        return Err(ParseError::TooLarge { field, max });
    }
    Ok(number)
}

fn parse_int(
    value: Option<&str>,
    field: &'static str,
    default: u32,
    min: u32,
    max: u32,
) -> Result<u32, ParseError> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };
    let number: u32 = value.parse().map_err(|_| ParseError::NotAnInteger(field))?;
    if number < min {
        return Err(ParseError::TooSmall { field, min: min as f64 });
    }
    if number > max {
        return Err(ParseError::TooLarge { field, max: max as f64 });
    }
    Ok(number)
}

fn parse_seed(value: Option<&str>, field: &'static str) -> Result<Option<u64>, ParseError> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let number: u64 = value.parse().map_err(|_| ParseError::NotAnInteger(field))?;
    Ok(Some(number))
}

/// 把指令正文切成 (Key, Value) 序列。
///
/// 显式向前扫描而不是正则回溯：一个键值对在下一个合法的 `Key:<` 起点
/// （或正文结尾）处结束，取该范围内最后一个 `>` 作为闭合符，
/// 因此 Value 里允许出现逗号和裸 `>`（如颜文字 `>_<`）。
fn collect_pairs(content: &str) -> Vec<(String, String)> {
    let chars: Vec<char> = content.chars().collect();

    // opener: (键起点, 键终点=冒号位置, 值起点='<'后一位)
    let mut openers: Vec<(usize, usize, usize)> = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ':' || chars[i] == '：' {
            let mut key_start = i;
            while key_start > 0 {
                let prev = chars[key_start - 1];
                if prev.is_whitespace() || prev == ':' || prev == '：' {
                    break;
                }
                key_start -= 1;
            }
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            let preceded_by_gap = key_start == 0 || chars[key_start - 1].is_whitespace();
            if key_start < i && j < chars.len() && chars[j] == '<' && preceded_by_gap {
                openers.push((key_start, i, j + 1));
                i = j + 1;
                continue;
            }
        }
        i += 1;
    }

    let mut pairs = Vec::new();
    for (n, &(key_start, key_end, value_start)) in openers.iter().enumerate() {
        let limit = if n + 1 < openers.len() { openers[n + 1].0 } else { chars.len() };
        let close = (value_start..limit).rev().find(|&k| chars[k] == '>');
        let Some(close) = close else { continue };
        let key: String = chars[key_start..key_end].iter().collect();
        let value: String = chars[value_start..close].iter().collect();
        pairs.push((key.trim().to_string(), value.trim().to_string()));
    }
    pairs
}

#[derive(Default)]
struct CharacterEntry {
    positive: Option<String>,
    negative: Option<String>,
    position: Option<String>,
}

/// 键属于角色族则写入 entries 并返回 true；否则返回 false 交给通用键处理。
fn route_character_key(
    key: &str,
    value: &str,
    entries: &mut BTreeMap<u8, CharacterEntry>,
) -> Result<bool, ParseError> {
    let Some(rest) = key.strip_prefix(CHARACTER_KEY_PREFIX) else {
        return Ok(false);
    };
    let Some(suffix) = CHARACTER_SUFFIXES.iter().find(|s| rest.ends_with(*s)) else {
        return Ok(false);
    };
    let index_part = &rest[..rest.len() - suffix.len()];
    if index_part.is_empty() || !index_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(ParseError::MalformedCharacterKey(key.to_string()));
    }
    let index: u8 = index_part
        .parse()
        .map_err(|_| ParseError::CharacterIndexOutOfRange)?;
    if !(1..=5).contains(&index) {
        return Err(ParseError::CharacterIndexOutOfRange);
    }

    let entry = entries.entry(index).or_default();
    match *suffix {
        "正面词条" => entry.positive = Some(value.to_string()),
        "负面词条" => entry.negative = Some(value.to_string()),
        _ => entry.position = Some(value.to_string()),
    }
    Ok(true)
}

/// 解析一条 `/nai` 指令。
pub fn parse_generation_command(raw: &str) -> Result<ParsedParams, ParseError> {
    if raw.is_empty() {
        return Err(ParseError::MissingPrefix);
    }

    // 统一替换中文逗号为英文逗号，避免参数分隔问题
    let message = raw.replace('，', ",");
    let stripped = message.trim();
    if !stripped.starts_with(COMMAND_PREFIX) {
        return Err(ParseError::MissingPrefix);
    }

    let content = stripped[COMMAND_PREFIX.len()..].trim();
    if content.is_empty() {
        return Err(ParseError::MissingPrompt);
    }

    let pairs = collect_pairs(content);
    if pairs.is_empty() {
        return Err(ParseError::MalformedPairs);
    }

    let mut general: BTreeMap<String, String> = BTreeMap::new();
    let mut character_entries: BTreeMap<u8, CharacterEntry> = BTreeMap::new();
    for (key, value) in pairs {
        if route_character_key(&key, &value, &mut character_entries)? {
            continue;
        }
        if !GENERAL_KEYS.contains(&key.as_str()) {
            return Err(ParseError::UnknownKey(key));
        }
        general.insert(key, value);
    }
    let get = |key: &str| general.get(key).map(String::as_str);
    let get_nonempty =
        |key: &str| general.get(key).map(String::as_str).filter(|v| !v.is_empty());

    let positive_prompt = get_nonempty("正面词条").ok_or(ParseError::MissingPrompt)?;

    let model_name = get_nonempty("模型").map(str::to_string);
    let negative_prompt = get_nonempty("负面词条").map(str::to_string);

    let furry_mode = parse_bool(get("是否有福瑞"), "是否有福瑞", false)?;
    let add_quality_tags = parse_bool(get("添加质量词"), "添加质量词", false)?;

    let base_image = get_nonempty("底图").map(str::to_string);
    let base_strength = parse_float(get("底图重绘强度"), "底图重绘强度", 0.7, 0.0, 1.0)?;
    let base_noise = parse_float(get("底图加噪强度"), "底图加噪强度", 0.0, 0.0, 0.99)?;

    let resolution_key = get("分辨率").unwrap_or("竖图");
    let (width, height) = resolution(resolution_key).ok_or(ParseError::InvalidResolution)?;

    let steps = parse_int(get("步数"), "步数", 28, 1, 28)?;
    let guidance = parse_float(get("指导系数"), "指导系数", 5.0, 0.0, 10.0)?;
    let cfg_rescale = parse_float(get("重采样系数"), "重采样系数", 0.0, 0.0, 1.0)?;
    let seed = parse_seed(get("种子"), "种子")?;

    let sampler = get("采样器").unwrap_or(DEFAULT_SAMPLER);
    if !SAMPLERS.contains(&sampler) {
        return Err(ParseError::InvalidSampler);
    }

    let mut use_character_zones = parse_bool(get("角色是否分区"), "角色是否分区", false)?;

    if character_entries.len() > 5 {
        return Err(ParseError::TooManyCharacters);
    }
    let mut characters = Vec::with_capacity(character_entries.len());
    for (index, entry) in &character_entries {
        let positive = entry
            .positive
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(ParseError::CharacterMissingPrompt(*index))?;
        let position = entry
            .position
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or("C3")
            .to_uppercase();
        if !is_valid_position(&position) {
            return Err(ParseError::InvalidCharacterPosition(*index));
        }
        characters.push(CharacterPrompt {
            index: *index,
            positive: positive.to_string(),
            negative: entry.negative.clone().filter(|n| !n.is_empty()),
            position,
        });
    }

    let mut character_reference = get_nonempty("角色参考").map(str::to_string);
    let character_reference_strength =
        parse_float(get("角色参考强度"), "角色参考强度", 1.0, 0.0, 1.0)?;
    let style_aware = parse_bool(get("是否注意原画风"), "是否注意原画风", false)?;

    // 跨字段约束放在所有单字段校验之后
    if characters.len() <= 1 {
        use_character_zones = false;
    }
    if base_image.is_some() {
        character_reference = None; // 底图已存在则忽略角色参考
    }

    Ok(ParsedParams {
        positive_prompt: positive_prompt.to_string(),
        negative_prompt,
        negative_preset: DEFAULT_UC_PRESET.to_string(),
        model_name,
        furry_mode,
        add_quality_tags,
        base_image,
        base_strength,
        base_noise,
        width,
        height,
        steps,
        guidance,
        cfg_rescale,
        seed,
        sampler: sampler.to_string(),
        use_character_zones,
        characters,
        character_reference,
        character_reference_strength,
        style_aware,
    })
}
