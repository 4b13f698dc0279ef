//! NovelAI 模型常量表：采样器、分辨率、质量词、负面预设等。

/// 支持的模型列表。
pub const MODELS: [&str; 6] = [
    "nai-diffusion-4-5-full",
    "nai-diffusion-4-5-curated",
    "nai-diffusion-4-full",
    "nai-diffusion-4-curated-preview",
    "nai-diffusion-3",
    "nai-diffusion-furry-3",
];

/// 支持的采样器列表。
pub const SAMPLERS: [&str; 6] = [
    "k_euler",
    "k_euler_ancestral",
    "k_dpmpp_2s_ancestral",
    "k_dpmpp_2m",
    "k_dpmpp_sde",
    "k_dpmpp_2m_sde",
];

pub const NOISE_SCHEDULES: [&str; 4] = ["native", "karras", "exponential", "polyexponential"];

/// UC 预设名称。目前指令层固定使用 "Heavy"。
pub const UC_PRESETS: [&str; 5] = ["Heavy", "Light", "Furry Focus", "Human Focus", "None"];

pub const DEFAULT_UC_PRESET: &str = "Heavy";

pub const DEFAULT_SAMPLER: &str = "k_euler_ancestral";

/// 分辨率关键字 → (width, height)。
pub fn resolution(keyword: &str) -> Option<(u32, u32)> {
    match keyword {
        "竖图" => Some((832, 1216)),
        "横图" => Some((1216, 832)),
        "方图" => Some((1024, 1024)),
        _ => None,
    }
}

/// 角色位置编码是否在 A1..E5 网格内。
pub fn is_valid_position(code: &str) -> bool {
    let mut chars = code.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(letter), Some(digit), None) => {
            ('A'..='E').contains(&letter) && ('1'..='5').contains(&digit)
        }
        _ => false,
    }
}

/// 位置编码（如 C3）→ 归一化浮点坐标。
///
/// 非法编码一律落到画面中心 (0.5, 0.5)：解析器已经校验过编码，
/// 这里保持全函数不失败，兜底其他入口构造的参数。
pub fn position_to_float(code: &str) -> (f64, f64) {
    let mut chars = code.chars();
    let (Some(letter), Some(digit)) = (chars.next(), chars.next()) else {
        return (0.5, 0.5);
    };

    let x = match letter.to_ascii_uppercase() {
        'A' => 0.1,
        'B' => 0.3,
        'C' => 0.5,
        'D' => 0.7,
        'E' => 0.9,
        _ => 0.5,
    };
    let y = match digit {
        '1' => 0.1,
        '2' => 0.3,
        '3' => 0.5,
        '4' => 0.7,
        '5' => 0.9,
        _ => 0.5,
    };
    (x, y)
}

/// 模型的质量词后缀，追加在正面词条之后。没有配置的模型返回空串。
pub fn quality_tags(model: &str) -> &'static str {
    match model {
        "nai-diffusion-4-5-full" => ", very aesthetic, masterpiece, no text",
        "nai-diffusion-4-5-curated" => {
            ", very aesthetic, masterpiece, no text, -0.8::feet::, rating:general"
        }
        "nai-diffusion-4-full" => ", no text, best quality, very aesthetic, absurdres",
        "nai-diffusion-4-curated-preview" => {
            ", rating:general, best quality, very aesthetic, absurdres"
        }
        "nai-diffusion-3" => ", best quality, amazing quality, very aesthetic, absurdres",
        "nai-diffusion-furry-3" => ", {best quality}, {amazing quality}",
        _ => "",
    }
}

/// 模型 + 预设名 → ucPreset 数值。未知组合返回 0。
pub fn uc_preset_value(model: &str, preset: &str) -> i32 {
    match (model, preset) {
        ("nai-diffusion-4-5-full", "Heavy") => 0,
        ("nai-diffusion-4-5-full", "Light") => 1,
        ("nai-diffusion-4-5-full", "Furry Focus") => 2,
        ("nai-diffusion-4-5-full", "Human Focus") => 3,
        ("nai-diffusion-4-5-full", "None") => 4,

        ("nai-diffusion-4-5-curated", "Heavy") => 0,
        ("nai-diffusion-4-5-curated", "Light") => 1,
        ("nai-diffusion-4-5-curated", "Human Focus") => 2,
        ("nai-diffusion-4-5-curated", "None") => 3,

        ("nai-diffusion-3", "Heavy") => 0,
        ("nai-diffusion-3", "Light") => 1,
        ("nai-diffusion-3", "Human Focus") => 2,
        ("nai-diffusion-3", "None") => 3,

        ("nai-diffusion-furry-3", "Heavy") => 0,
        ("nai-diffusion-furry-3", "Light") => 1,
        ("nai-diffusion-furry-3", "None") => 2,

        ("nai-diffusion-4-curated-preview", "Heavy") => 0,
        ("nai-diffusion-4-curated-preview", "Light") => 1,
        ("nai-diffusion-4-curated-preview", "None") => 2,

        ("nai-diffusion-4-full", "Heavy") => 0,
        ("nai-diffusion-4-full", "Light") => 1,
        ("nai-diffusion-4-full", "None") => 2,

        _ => 0,
    }
}

/// 模型 + 预设名 → 负面词条预设文本。
pub fn negative_preset(model: &str, preset: &str) -> &'static str {
    match (model, preset) {
        ("nai-diffusion-4-5-full", "Heavy") => "lowres, artistic error, film grain, scan artifacts, worst quality, bad quality, jpeg artifacts, very displeasing, chromatic aberration, dithering, halftone, screentone, multiple views, logo, too many watermarks, negative space, blank page",
        ("nai-diffusion-4-5-full", "Light") => "lowres, artistic error, scan artifacts, worst quality, bad quality, jpeg artifacts, multiple views, very displeasing, too many watermarks, negative space, blank page",
        ("nai-diffusion-4-5-full", "Furry Focus") => "{worst quality}, distracting watermark, unfinished, bad quality, {widescreen}, upscale, {sequence}, {{grandfathered content}}, blurred foreground, chromatic aberration, sketch, everyone, [sketch background], simple, [flat colors], ych (character), outline, multiple scenes, [[horror (theme)]], comic",
        ("nai-diffusion-4-5-full", "Human Focus") => "lowres, artistic error, film grain, scan artifacts, worst quality, bad quality, jpeg artifacts, very displeasing, chromatic aberration, dithering, halftone, screentone, multiple views, logo, too many watermarks, negative space, blank page, @_@, mismatched pupils, glowing eyes, bad anatomy",
        ("nai-diffusion-4-5-full", "None") => "",

        ("nai-diffusion-4-5-curated", "Heavy") => "blurry, lowres, upscaled, artistic error, film grain, scan artifacts, worst quality, bad quality, jpeg artifacts, very displeasing, chromatic aberration, halftone, multiple views, logo, too many watermarks, negative space, blank page",
        ("nai-diffusion-4-5-curated", "Light") => "blurry, lowres, upscaled, artistic error, scan artifacts, jpeg artifacts, logo, too many watermarks, negative space, blank page",
        ("nai-diffusion-4-5-curated", "Human Focus") => "blurry, lowres, upscaled, artistic error, film grain, scan artifacts, bad anatomy, bad hands, worst quality, bad quality, jpeg artifacts, very displeasing, chromatic aberration, halftone, multiple views, logo, too many watermarks, @_@, mismatched pupils, glowing eyes, negative space, blank page",
        ("nai-diffusion-4-5-curated", "None") => "",

        ("nai-diffusion-4-full", "Heavy") => "blurry, lowres, error, film grain, scan artifacts, worst quality, bad quality, jpeg artifacts, very displeasing, chromatic aberration, multiple views, logo, too many watermarks, white blank page, blank page",
        ("nai-diffusion-4-full", "Light") => "blurry, lowres, error, worst quality, bad quality, jpeg artifacts, very displeasing, white blank page, blank page",
        ("nai-diffusion-4-full", "None") => "",

        ("nai-diffusion-4-curated-preview", "Heavy") => "blurry, lowres, error, film grain, scan artifacts, worst quality, bad quality, jpeg artifacts, very displeasing, chromatic aberration, logo, dated, signature, multiple views, gigantic breasts, white blank page, blank page",
        ("nai-diffusion-4-curated-preview", "Light") => "blurry, lowres, error, worst quality, bad quality, jpeg artifacts, very displeasing, logo, dated, signature, white blank page, blank page",
        ("nai-diffusion-4-curated-preview", "None") => "",

        ("nai-diffusion-3", "Heavy") => "lowres, {bad}, error, fewer, extra, missing, worst quality, jpeg artifacts, bad quality, watermark, unfinished, displeasing, chromatic aberration, signature, extra digits, artistic error, username, scan, [abstract]",
        ("nai-diffusion-3", "Light") => "lowres, jpeg artifacts, worst quality, watermark, blurry, very displeasing",
        ("nai-diffusion-3", "Human Focus") => "lowres, {bad}, error, fewer, extra, missing, worst quality, jpeg artifacts, bad quality, watermark, unfinished, displeasing, chromatic aberration, signature, extra digits, artistic error, username, scan, [abstract], bad anatomy, bad hands, @_@, mismatched pupils, heart-shaped pupils, glowing eyes",
        ("nai-diffusion-3", "None") => "lowres",

        ("nai-diffusion-furry-3", "Heavy") => "{{worst quality}}, [displeasing], {unusual pupils}, guide lines, {{unfinished}}, {bad}, url, artist name, {{tall image}}, mosaic, {sketch page}, comic panel, impact (font), [dated], {logo}, ych, {what}, {where is your god now}, {distorted text}, repeated text, {floating head}, {1994}, {widescreen}, absolutely everyone, sequence, {compression artifacts}, hard translated, {cropped}, {commissioner name}, unknown text, high contrast",
        ("nai-diffusion-furry-3", "Light") => "{worst quality}, guide lines, unfinished, bad, url, tall image, widescreen, compression artifacts, unknown text",
        ("nai-diffusion-furry-3", "None") => "lowres",

        _ => "",
    }
}

/// 模型的 skip_cfg_above_sigma 常量。
pub fn skip_cfg_above_sigma(model: &str) -> f64 {
    match model {
        "nai-diffusion-4-5-full" => 58.0,
        "nai-diffusion-4-5-curated" => 36.158893609242725,
        "nai-diffusion-3" => 11.84515480302779,
        "nai-diffusion-furry-3" => 11.84515480302779,
        "nai-diffusion-4-curated-preview" => 11.84515480302779,
        "nai-diffusion-4-full" => 18.254609533779934,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_grid_exact() {
        let xs = [('A', 0.1), ('B', 0.3), ('C', 0.5), ('D', 0.7), ('E', 0.9)];
        let ys = [('1', 0.1), ('2', 0.3), ('3', 0.5), ('4', 0.7), ('5', 0.9)];
        for (letter, x) in xs {
            for (digit, y) in ys {
                let code = format!("{letter}{digit}");
                assert!(is_valid_position(&code), "{code} should be valid");
                assert_eq!(position_to_float(&code), (x, y), "code {code}");
            }
        }
    }

    #[test]
    fn test_position_invalid_falls_back_to_center() {
        for code in ["", "C", "F3", "C6", "C0", "33", "AA", "C33", "哈3"] {
            assert_eq!(position_to_float(code), (0.5, 0.5), "code {code:?}");
        }
        assert!(!is_valid_position("F3"));
        assert!(!is_valid_position("C6"));
        assert!(!is_valid_position("C33"));
    }

    #[test]
    fn test_position_lowercase_letter_accepted() {
        // 解析器会先转大写，这里兜底层面也接受小写字母
        assert_eq!(position_to_float("a1"), (0.1, 0.1));
    }

    #[test]
    fn test_resolution_map() {
        assert_eq!(resolution("竖图"), Some((832, 1216)));
        assert_eq!(resolution("横图"), Some((1216, 832)));
        assert_eq!(resolution("方图"), Some((1024, 1024)));
        assert_eq!(resolution("长图"), None);
    }

    #[test]
    fn test_uc_preset_values() {
        assert_eq!(uc_preset_value("nai-diffusion-4-5-full", "None"), 4);
        assert_eq!(uc_preset_value("nai-diffusion-4-5-curated", "Human Focus"), 2);
        assert_eq!(uc_preset_value("nai-diffusion-furry-3", "None"), 2);
        // 未知组合回落到 0
        assert_eq!(uc_preset_value("nai-diffusion-furry-3", "Furry Focus"), 0);
    }

    #[test]
    fn test_every_model_has_heavy_preset_and_sigma() {
        for model in MODELS {
            assert!(!negative_preset(model, "Heavy").is_empty(), "{model}");
            assert!(skip_cfg_above_sigma(model) > 0.0, "{model}");
        }
        assert_eq!(skip_cfg_above_sigma("nai-diffusion-4-5-curated"), 36.158893609242725);
    }
}
