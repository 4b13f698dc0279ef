//! NovelAI 请求体的强类型构造。
//!
//! 与远端接口逐字段对齐；可省略的字段一律用 `Option` 表达，
//! 序列化时跳过 `None`，避免"未设置"和"显式 false"混在一起。

use serde::Serialize;

/// 请求动作标签。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Generate,
    #[serde(rename = "img2img")]
    Img2Img,
    Inpaint,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Center {
    pub x: f64,
    pub y: f64,
}

/// v4 提示词里的单角色子标题。
#[derive(Debug, Clone, Serialize)]
pub struct CharCaption {
    pub char_caption: String,
    pub centers: Vec<Center>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Caption {
    pub base_caption: String,
    pub char_captions: Vec<CharCaption>,
}

#[derive(Debug, Clone, Serialize)]
pub struct V4Prompt {
    pub caption: Caption,
    pub use_coords: bool,
    pub use_order: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct V4NegativePrompt {
    pub caption: Caption,
    pub legacy_uc: bool,
}

/// characterPrompts 数组的条目。
#[derive(Debug, Clone, Serialize)]
pub struct CharacterPromptEntry {
    pub prompt: String,
    pub uc: String,
    pub center: Center,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectorReferenceDescription {
    pub caption: Caption,
    pub legacy_uc: bool,
}

/// 请求体的 parameters 对象。字段顺序与远端约定保持一致。
#[derive(Debug, Clone, Serialize)]
pub struct Parameters {
    pub params_version: u32,
    pub width: u32,
    pub height: u32,
    pub scale: f64,
    pub sampler: String,
    pub steps: u32,
    pub n_samples: u32,
    #[serde(rename = "ucPreset")]
    pub uc_preset: i32,
    #[serde(rename = "qualityToggle")]
    pub quality_toggle: bool,
    #[serde(rename = "autoSmea")]
    pub auto_smea: bool,
    pub dynamic_thresholding: bool,
    pub controlnet_strength: u32,
    pub legacy: bool,
    pub add_original_image: bool,
    pub cfg_rescale: f64,
    pub noise_schedule: String,
    pub legacy_v3_extend: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_cfg_above_sigma: Option<f64>,
    pub use_coords: bool,
    pub normalize_reference_strength_multiple: bool,
    pub use_order: bool,
    pub legacy_uc: bool,
    pub seed: u64,
    #[serde(rename = "characterPrompts")]
    pub character_prompts: Vec<CharacterPromptEntry>,
    pub negative_prompt: String,
    pub sm: bool,
    pub sm_dyn: bool,
    pub v4_prompt: V4Prompt,
    pub v4_negative_prompt: V4NegativePrompt,
    pub stream: String,
    // k_euler_ancestral 专属的稳定性修正开关
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliberate_euler_ancestral_bug: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefer_brownian: Option<bool>,
    // 角色参考（director reference）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub director_reference_images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub director_reference_descriptions: Option<Vec<DirectorReferenceDescription>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub director_reference_information_extracted: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub director_reference_strength_values: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub director_reference_secondary_strength_values: Option<Vec<f64>>,
    // 图生图 / 局部重绘
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_noise_seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
}

/// 发往生成接口的完整请求体。
#[derive(Debug, Clone, Serialize)]
pub struct ImageRequest {
    pub input: String,
    pub model: String,
    pub action: Action,
    pub parameters: Parameters,
    pub use_new_shared_trial: bool,
}

/// 文生图请求的可变输入集合，模型无关的开关不在这里出现。
#[derive(Debug, Clone)]
pub struct Text2ImageSpec {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub scale: f64,
    pub sampler: String,
    pub steps: u32,
    pub uc_preset: i32,
    pub quality_toggle: bool,
    pub cfg_rescale: f64,
    pub skip_cfg_above_sigma: f64,
    pub use_coords: bool,
    pub seed: u64,
    pub character_prompts: Vec<CharacterPromptEntry>,
    pub v4_positive: Vec<CharCaption>,
    pub v4_negative: Vec<CharCaption>,
}

/// 构建基础的文本生图请求体。
pub fn build_text2image(model: &str, spec: Text2ImageSpec) -> ImageRequest {
    let euler_ancestral = spec.sampler == "k_euler_ancestral";
    let parameters = Parameters {
        params_version: 3,
        width: spec.width,
        height: spec.height,
        scale: spec.scale,
        sampler: spec.sampler,
        steps: spec.steps,
        n_samples: 1,
        uc_preset: spec.uc_preset,
        quality_toggle: spec.quality_toggle,
        auto_smea: false,
        dynamic_thresholding: false,
        controlnet_strength: 1,
        legacy: false,
        add_original_image: true,
        cfg_rescale: spec.cfg_rescale,
        noise_schedule: "native".to_string(),
        legacy_v3_extend: false,
        skip_cfg_above_sigma: Some(spec.skip_cfg_above_sigma),
        use_coords: spec.use_coords,
        normalize_reference_strength_multiple: false,
        use_order: true,
        legacy_uc: false,
        seed: spec.seed,
        character_prompts: spec.character_prompts,
        negative_prompt: spec.negative_prompt.clone(),
        sm: false,
        sm_dyn: false,
        v4_prompt: V4Prompt {
            caption: Caption {
                base_caption: spec.prompt.clone(),
                char_captions: spec.v4_positive,
            },
            use_coords: spec.use_coords,
            use_order: true,
        },
        v4_negative_prompt: V4NegativePrompt {
            caption: Caption {
                base_caption: spec.negative_prompt,
                char_captions: spec.v4_negative,
            },
            legacy_uc: false,
        },
        stream: "msgpack".to_string(),
        deliberate_euler_ancestral_bug: euler_ancestral.then_some(false),
        prefer_brownian: euler_ancestral.then_some(true),
        director_reference_images: None,
        director_reference_descriptions: None,
        director_reference_information_extracted: None,
        director_reference_strength_values: None,
        director_reference_secondary_strength_values: None,
        strength: None,
        noise: None,
        image: None,
        extra_noise_seed: None,
        color_correct: None,
        mask: None,
    };

    ImageRequest {
        input: spec.prompt,
        model: model.to_string(),
        action: Action::Generate,
        parameters,
        use_new_shared_trial: true,
    }
}

/// 基于文本生图请求构建图生图请求。
pub fn wrap_image2image(
    mut request: ImageRequest,
    image: String,
    strength: f64,
    noise: f64,
    extra_noise_seed: u64,
) -> ImageRequest {
    request.action = Action::Img2Img;
    let params = &mut request.parameters;
    params.strength = Some(strength);
    params.noise = Some(noise);
    params.image = Some(image);
    params.extra_noise_seed = Some(extra_noise_seed);
    params.color_correct = Some(false);
    request
}

/// 基于图生图请求构建局部重绘请求。curated 系模型换成对应的 inpainting 变体。
pub fn wrap_inpaint(mut request: ImageRequest, mask: String) -> ImageRequest {
    request.action = Action::Inpaint;
    if request.model.ends_with("-curated") {
        request.model = format!("{}-inpainting", request.model);
    }
    let params = &mut request.parameters;
    params.mask = Some(mask);
    params.add_original_image = false;
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(sampler: &str) -> Text2ImageSpec {
        Text2ImageSpec {
            prompt: "1girl".to_string(),
            negative_prompt: "lowres".to_string(),
            width: 832,
            height: 1216,
            scale: 5.0,
            sampler: sampler.to_string(),
            steps: 28,
            uc_preset: 0,
            quality_toggle: false,
            cfg_rescale: 0.0,
            skip_cfg_above_sigma: 58.0,
            use_coords: false,
            seed: 4242424242,
            character_prompts: vec![],
            v4_positive: vec![],
            v4_negative: vec![],
        }
    }

    #[test]
    fn test_action_tags_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&Action::Generate).unwrap(), "\"generate\"");
        assert_eq!(serde_json::to_string(&Action::Img2Img).unwrap(), "\"img2img\"");
        assert_eq!(serde_json::to_string(&Action::Inpaint).unwrap(), "\"inpaint\"");
    }

    #[test]
    fn test_text2image_wire_shape() {
        let request = build_text2image("nai-diffusion-4-5-full", spec("k_dpmpp_2m"));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["input"], "1girl");
        assert_eq!(value["action"], "generate");
        assert_eq!(value["use_new_shared_trial"], true);
        let params = &value["parameters"];
        assert_eq!(params["params_version"], 3);
        assert_eq!(params["ucPreset"], 0);
        assert_eq!(params["qualityToggle"], false);
        assert_eq!(params["autoSmea"], false);
        assert_eq!(params["characterPrompts"], serde_json::json!([]));
        assert_eq!(params["noise_schedule"], "native");
        assert_eq!(params["stream"], "msgpack");
        assert_eq!(params["seed"], 4242424242u64);
        assert_eq!(params["v4_prompt"]["caption"]["base_caption"], "1girl");
        assert_eq!(params["v4_negative_prompt"]["caption"]["base_caption"], "lowres");
        // 非 ancestral 采样器不应出现修正开关
        assert!(params.get("deliberate_euler_ancestral_bug").is_none());
        assert!(params.get("prefer_brownian").is_none());
        assert!(params.get("image").is_none());
        assert!(params.get("mask").is_none());
    }

    #[test]
    fn test_euler_ancestral_sets_fixed_flags() {
        let request = build_text2image("nai-diffusion-3", spec("k_euler_ancestral"));
        let params = serde_json::to_value(&request.parameters).unwrap();
        assert_eq!(params["deliberate_euler_ancestral_bug"], false);
        assert_eq!(params["prefer_brownian"], true);
    }

    #[test]
    fn test_image2image_wrap() {
        let request = build_text2image("nai-diffusion-4-5-full", spec("k_euler"));
        let request = wrap_image2image(request, "b64data".to_string(), 0.7, 0.1, 99);
        assert_eq!(request.action, Action::Img2Img);
        assert_eq!(request.parameters.strength, Some(0.7));
        assert_eq!(request.parameters.noise, Some(0.1));
        assert_eq!(request.parameters.image.as_deref(), Some("b64data"));
        assert_eq!(request.parameters.extra_noise_seed, Some(99));
        assert_eq!(request.parameters.color_correct, Some(false));
    }

    #[test]
    fn test_inpaint_wrap_renames_curated_model() {
        let request = build_text2image("nai-diffusion-4-5-curated", spec("k_euler"));
        let request = wrap_image2image(request, "b64data".to_string(), 0.7, 0.0, 7);
        let request = wrap_inpaint(request, "maskdata".to_string());
        assert_eq!(request.action, Action::Inpaint);
        assert_eq!(request.model, "nai-diffusion-4-5-curated-inpainting");
        assert_eq!(request.parameters.mask.as_deref(), Some("maskdata"));
        assert!(!request.parameters.add_original_image);

        // full 系模型不改名
        let request = build_text2image("nai-diffusion-4-5-full", spec("k_euler"));
        let request = wrap_image2image(request, "b64data".to_string(), 0.7, 0.0, 7);
        let request = wrap_inpaint(request, "maskdata".to_string());
        assert_eq!(request.model, "nai-diffusion-4-5-full");
    }
}
