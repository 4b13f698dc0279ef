//! NovelAI 接口调用逻辑：参数 → 请求体编译，以及实际的生成请求。

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use crate::constants::{
    negative_preset, position_to_float, quality_tags, skip_cfg_above_sigma, uc_preset_value, MODELS,
};
use crate::image_utils::extract_zip_image;
use crate::parser::{CharacterPrompt, ParsedParams};
use crate::payload::{
    build_text2image, wrap_image2image, wrap_inpaint, Caption, CharCaption, CharacterPromptEntry,
    Center, DirectorReferenceDescription, ImageRequest, Text2ImageSpec,
};

pub const API_URL: &str = "https://image.novelai.net/ai/generate-image";

/// NovelAI 接口调用失败。
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("未配置NovelAI Token")]
    MissingToken,
    #[error("不支持的模型: {0}")]
    UnsupportedModel(String),
    #[error("局部重绘缺少底图")]
    MaskWithoutBaseImage,
    #[error("NovelAI返回错误({status}): {body}")]
    Http { status: u16, body: String },
    #[error("NovelAI请求失败: {0}")]
    Request(#[from] reqwest::Error),
    #[error("解析NovelAI响应失败: {0:#}")]
    Decode(anyhow::Error),
}

pub struct NovelAiApi {
    token: String,
    client: reqwest::Client,
}

impl NovelAiApi {
    pub fn new(token: &str, proxy: Option<&str>) -> Result<Self, ApiError> {
        if token.is_empty() {
            return Err(ApiError::MissingToken);
        }
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(180));
        if let Some(proxy) = proxy.filter(|p| !p.is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            token: token.to_string(),
            client: builder.build()?,
        })
    }

    /// 把解析后的参数编译为指定模型的请求体，返回请求体和实际使用的种子。
    ///
    /// 除未提供种子时的随机抽取外是纯函数；底图/角色参考的互斥已由
    /// 解析层保证，这里不再复查。
    pub fn build_payload(
        &self,
        parsed: &ParsedParams,
        model: &str,
        base_image: Option<String>,
        mask_image: Option<String>,
        character_reference: Option<String>,
    ) -> Result<(ImageRequest, u64), ApiError> {
        if !MODELS.contains(&model) {
            return Err(ApiError::UnsupportedModel(model.to_string()));
        }
        if mask_image.is_some() && base_image.is_none() {
            return Err(ApiError::MaskWithoutBaseImage);
        }

        let seed = parsed
            .seed
            .unwrap_or_else(|| rand::rng().random_range(1_000_000_000..=9_999_999_999));

        let mut prompt = parsed.positive_prompt.trim().to_string();
        if parsed.furry_mode {
            prompt = format!("fur dataset, {prompt}");
        }
        let tags = quality_tags(model);
        if parsed.add_quality_tags && !tags.is_empty() {
            prompt.push_str(tags);
        }

        let mut negative = parsed
            .negative_prompt
            .clone()
            .unwrap_or_else(|| negative_preset(model, &parsed.negative_preset).to_string());

        let use_zones = parsed.use_character_zones && !parsed.characters.is_empty();
        let mut v4_positive = Vec::new();
        let mut v4_negative = Vec::new();
        let mut character_prompts = Vec::new();
        if use_zones {
            for character in &parsed.characters {
                let center = character_center(character);
                v4_positive.push(CharCaption {
                    char_caption: character.positive.clone(),
                    centers: vec![center],
                });
                v4_negative.push(CharCaption {
                    char_caption: character.negative.clone().unwrap_or_default(),
                    centers: vec![center],
                });
                character_prompts.push(CharacterPromptEntry {
                    prompt: character.positive.clone(),
                    uc: character.negative.clone().unwrap_or_default(),
                    center,
                    enabled: true,
                });
            }
        } else if !parsed.characters.is_empty() {
            // 不分区时把角色词条并入主词条，按序号顺序逗号连接
            let positives: Vec<&str> = parsed
                .characters
                .iter()
                .map(|c| c.positive.as_str())
                .filter(|p| !p.is_empty())
                .collect();
            let negatives: Vec<&str> = parsed
                .characters
                .iter()
                .filter_map(|c| c.negative.as_deref())
                .filter(|n| !n.is_empty())
                .collect();
            if !positives.is_empty() {
                let addon = positives.join(", ");
                prompt = if prompt.is_empty() { addon } else { format!("{prompt}, {addon}") };
            }
            if !negatives.is_empty() {
                let addon = negatives.join(", ");
                negative =
                    if negative.is_empty() { addon } else { format!("{negative}, {addon}") };
            }
        }

        let mut request = build_text2image(
            model,
            Text2ImageSpec {
                prompt,
                negative_prompt: negative,
                width: parsed.width,
                height: parsed.height,
                scale: parsed.guidance,
                sampler: parsed.sampler.clone(),
                steps: parsed.steps,
                uc_preset: uc_preset_value(model, &parsed.negative_preset),
                quality_toggle: parsed.add_quality_tags,
                cfg_rescale: parsed.cfg_rescale,
                skip_cfg_above_sigma: skip_cfg_above_sigma(model),
                use_coords: use_zones,
                seed,
                character_prompts,
                v4_positive,
                v4_negative,
            },
        );

        if let Some(reference) = character_reference {
            let base_caption =
                if parsed.style_aware { "character&style" } else { "character" };
            let params = &mut request.parameters;
            params.director_reference_images = Some(vec![reference]);
            params.director_reference_descriptions = Some(vec![DirectorReferenceDescription {
                caption: Caption {
                    base_caption: base_caption.to_string(),
                    char_captions: vec![],
                },
                legacy_uc: false,
            }]);
            params.director_reference_information_extracted = Some(vec![1]);
            params.director_reference_strength_values =
                Some(vec![parsed.character_reference_strength]);
            params.director_reference_secondary_strength_values =
                Some(vec![(1.0 - parsed.character_reference_strength).max(0.0)]);
        }

        if let Some(image) = base_image {
            request =
                wrap_image2image(request, image, parsed.base_strength, parsed.base_noise, seed);
        }
        if let Some(mask) = mask_image {
            request = wrap_inpaint(request, mask);
        }

        Ok((request, seed))
    }

    /// 提交请求体并返回解包后的 PNG 字节。
    pub async fn generate_image(&self, payload: &ImageRequest) -> Result<Vec<u8>, ApiError> {
        let response = self
            .client
            .post(API_URL)
            .bearer_auth(&self.token)
            .header("Referer", "https://novelai.net/")
            .header("Origin", "https://novelai.net")
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Http { status: status.as_u16(), body });
        }

        let data = response.bytes().await?;
        extract_zip_image(&data, 0).map_err(ApiError::Decode)
    }
}

fn character_center(character: &CharacterPrompt) -> Center {
    let (x, y) = position_to_float(&character.position);
    Center { x, y }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_generation_command;
    use crate::payload::Action;

    fn api() -> NovelAiApi {
        NovelAiApi::new("test-token", None).unwrap()
    }

    fn parse(command: &str) -> ParsedParams {
        parse_generation_command(command).unwrap()
    }

    #[test]
    fn test_empty_token_rejected() {
        assert!(matches!(NovelAiApi::new("", None), Err(ApiError::MissingToken)));
    }

    #[test]
    fn test_unsupported_model_rejected() {
        let parsed = parse("/nai 正面词条:<1girl>");
        let err = api()
            .build_payload(&parsed, "nai-diffusion-5", None, None, None)
            .unwrap_err();
        assert!(matches!(err, ApiError::UnsupportedModel(_)));
    }

    #[test]
    fn test_plain_generate_for_every_model() {
        let parsed = parse("/nai 正面词条:<1girl>");
        for model in MODELS {
            let (request, seed) = api()
                .build_payload(&parsed, model, None, None, None)
                .unwrap();
            assert_eq!(request.action, Action::Generate, "{model}");
            assert_eq!(request.model, model);
            assert_eq!(request.input, "1girl");
            assert_eq!(request.parameters.seed, seed);
            // 未指定种子时随机取 10 位整数
            assert!((1_000_000_000..=9_999_999_999).contains(&seed), "{model}: {seed}");
            assert_eq!(
                request.parameters.negative_prompt,
                negative_preset(model, "Heavy")
            );
            assert_eq!(
                request.parameters.skip_cfg_above_sigma,
                Some(skip_cfg_above_sigma(model))
            );
        }
    }

    #[test]
    fn test_explicit_seed_passthrough_is_idempotent() {
        let parsed = parse("/nai 正面词条:<1girl> 种子:<1234567890>");
        let (first, seed_a) = api()
            .build_payload(&parsed, "nai-diffusion-3", None, None, None)
            .unwrap();
        let (second, seed_b) = api()
            .build_payload(&parsed, "nai-diffusion-3", None, None, None)
            .unwrap();
        assert_eq!(seed_a, 1234567890);
        assert_eq!(seed_b, 1234567890);
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }

    #[test]
    fn test_furry_prefix_and_quality_tags_applied_once() {
        let parsed = parse("/nai 正面词条:<1girl> 是否有福瑞:<是> 添加质量词:<是>");
        let (request, _) = api()
            .build_payload(&parsed, "nai-diffusion-4-5-full", None, None, None)
            .unwrap();
        assert_eq!(
            request.input,
            "fur dataset, 1girl, very aesthetic, masterpiece, no text"
        );
        assert!(request.parameters.quality_toggle);
        assert_eq!(
            request.parameters.v4_prompt.caption.base_caption,
            request.input
        );
    }

    #[test]
    fn test_explicit_negative_overrides_preset() {
        let parsed = parse("/nai 正面词条:<1girl> 负面词条:<bad hands>");
        let (request, _) = api()
            .build_payload(&parsed, "nai-diffusion-3", None, None, None)
            .unwrap();
        assert_eq!(request.parameters.negative_prompt, "bad hands");
    }

    #[test]
    fn test_zoned_characters_become_captions() {
        let parsed = parse(
            "/nai 正面词条:<2girls> 角色是否分区:<是> \
             角色1正面词条:<red hair> 角色1位置:<A1> \
             角色2正面词条:<blue hair> 角色2负面词条:<hat>",
        );
        let (request, _) = api()
            .build_payload(&parsed, "nai-diffusion-4-5-full", None, None, None)
            .unwrap();
        assert!(request.parameters.use_coords);
        assert_eq!(request.input, "2girls");
        let prompts = &request.parameters.character_prompts;
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0].prompt, "red hair");
        assert_eq!(prompts[0].center, Center { x: 0.1, y: 0.1 });
        assert_eq!(prompts[1].uc, "hat");
        assert_eq!(prompts[1].center, Center { x: 0.5, y: 0.5 });
        let captions = &request.parameters.v4_prompt.caption.char_captions;
        assert_eq!(captions.len(), 2);
        assert_eq!(captions[1].char_caption, "blue hair");
    }

    #[test]
    fn test_unzoned_characters_concatenate() {
        let parsed = parse(
            "/nai 正面词条:<2girls> 负面词条:<lowres> \
             角色1正面词条:<red hair> 角色1负面词条:<hat> 角色2正面词条:<blue hair>",
        );
        let (request, _) = api()
            .build_payload(&parsed, "nai-diffusion-4-5-full", None, None, None)
            .unwrap();
        assert!(!request.parameters.use_coords);
        assert_eq!(request.input, "2girls, red hair, blue hair");
        assert_eq!(request.parameters.negative_prompt, "lowres, hat");
        assert!(request.parameters.character_prompts.is_empty());
    }

    #[test]
    fn test_character_reference_block() {
        let parsed = parse("/nai 正面词条:<1girl> 角色参考:<1> 角色参考强度:<0.8>");
        let (request, _) = api()
            .build_payload(&parsed, "nai-diffusion-4-5-full", None, None, Some("refdata".into()))
            .unwrap();
        let params = &request.parameters;
        assert_eq!(params.director_reference_images.as_deref(), Some(&["refdata".to_string()][..]));
        let descriptions = params.director_reference_descriptions.as_ref().unwrap();
        assert_eq!(descriptions[0].caption.base_caption, "character");
        assert_eq!(params.director_reference_strength_values.as_deref(), Some(&[0.8][..]));
        let secondary = params.director_reference_secondary_strength_values.as_ref().unwrap();
        assert!((secondary[0] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_style_aware_reference_caption() {
        let parsed = parse("/nai 正面词条:<1girl> 角色参考:<1> 是否注意原画风:<是>");
        let (request, _) = api()
            .build_payload(&parsed, "nai-diffusion-4-5-full", None, None, Some("refdata".into()))
            .unwrap();
        let descriptions = request.parameters.director_reference_descriptions.unwrap();
        assert_eq!(descriptions[0].caption.base_caption, "character&style");
    }

    #[test]
    fn test_img2img_and_inpaint_compile() {
        let parsed = parse("/nai 正面词条:<1girl> 底图:<1> 底图重绘强度:<0.5> 种子:<77>");
        let (request, seed) = api()
            .build_payload(
                &parsed,
                "nai-diffusion-4-5-curated",
                Some("basedata".into()),
                Some("maskdata".into()),
                None,
            )
            .unwrap();
        assert_eq!(seed, 77);
        assert_eq!(request.action, Action::Inpaint);
        assert_eq!(request.model, "nai-diffusion-4-5-curated-inpainting");
        assert_eq!(request.parameters.image.as_deref(), Some("basedata"));
        assert_eq!(request.parameters.mask.as_deref(), Some("maskdata"));
        assert_eq!(request.parameters.strength, Some(0.5));
        assert_eq!(request.parameters.extra_noise_seed, Some(77));
        assert!(!request.parameters.add_original_image);
    }

    #[test]
    fn test_mask_without_base_image_rejected() {
        let parsed = parse("/nai 正面词条:<1girl>");
        let err = api()
            .build_payload(
                &parsed,
                "nai-diffusion-3",
                None,
                Some("maskdata".into()),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, ApiError::MaskWithoutBaseImage));
    }
}
