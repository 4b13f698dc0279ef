//! 指令分发与生成任务的队列处理。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use log::{error, info};

use crate::access_control::AccessControl;
use crate::api::NovelAiApi;
use crate::config::Config;
use crate::constants::MODELS;
use crate::image_utils::{image_to_base64, save_image_from_bytes};
use crate::llm::create_llm;
use crate::nl::NlProcessor;
use crate::parser::{parse_generation_command, ParsedParams};
use crate::payload::ImageRequest;
use crate::queue::{QueueHandler, RequestQueue};

/// 队列里流转的一次生成任务。
pub struct GenerationJob {
    pub payload: ImageRequest,
    pub seed: u64,
    pub model: String,
    pub user_id: String,
    pub llm_model: Option<String>,
}

/// 队列工作端：调用远端生成、落盘、扣减额度。
pub struct GenerationWorker {
    api: Arc<NovelAiApi>,
    access: Arc<AccessControl>,
    save_dir: PathBuf,
}

#[async_trait]
impl QueueHandler<GenerationJob> for GenerationWorker {
    async fn handle(&self, job: &GenerationJob) -> Result<()> {
        let image_bytes = self.api.generate_image(&job.payload).await?;
        let file_path = store_image(&self.save_dir, &image_bytes, &job.model, job.seed)?;
        self.access.consume_quota(&job.user_id).await?;

        let mut message = format!("图片生成完成！模型: {}，种子: {}", job.model, job.seed);
        if let Some(llm_model) = &job.llm_model {
            message.push_str(&format!("，LLM: {llm_model}"));
        }
        println!("{message}");
        println!("已保存至 {}", file_path.display());
        Ok(())
    }

    async fn on_error(&self, error: anyhow::Error, _job: &GenerationJob) {
        error!("生成异常: {error:#}");
        println!("生成失败：{error}");
    }
}

fn store_image(save_dir: &Path, image_bytes: &[u8], model: &str, seed: u64) -> Result<PathBuf> {
    std::fs::create_dir_all(save_dir)?;
    let filename = format!("{}_{}_{}.png", Local::now().format("%Y%m%d_%H%M%S"), model, seed);
    let file_path = save_dir.join(filename);
    save_image_from_bytes(image_bytes, &file_path)?;
    Ok(file_path)
}

/// 聊天端适配器的 CLI 替身：按行接收指令，结果回显到终端。
pub struct App {
    config: Config,
    api: Arc<NovelAiApi>,
    access: Arc<AccessControl>,
    nl: Option<NlProcessor>,
    queue: RequestQueue<GenerationJob>,
    user_id: String,
}

impl App {
    pub fn new(config: Config, user_id: String) -> Result<Self> {
        let api = Arc::new(NovelAiApi::new(&config.nai_token, config.proxy.as_deref())?);
        let access = Arc::new(AccessControl::new(
            &config.whitelist_path,
            config.default_daily_limit,
        )?);

        let nl = match &config.nl {
            Some(nl_config) if !nl_config.api_key.is_empty() => {
                let llm = create_llm(nl_config, config.proxy.as_deref())?;
                info!("自然语言处理器初始化成功");
                Some(NlProcessor::new(llm, nl_config.prompt_templates.clone()))
            }
            Some(_) => {
                log::warn!("未配置 OpenRouter API Key，/nainl 功能不可用");
                None
            }
            None => None,
        };

        let worker = Arc::new(GenerationWorker {
            api: api.clone(),
            access: access.clone(),
            save_dir: PathBuf::from(&config.image_save_path),
        });
        let queue = RequestQueue::new(worker, config.min_delay, config.max_delay)?;

        Ok(Self {
            config,
            api,
            access,
            nl,
            queue,
            user_id,
        })
    }

    pub async fn start(&self) -> Result<()> {
        // 本地用户不在白名单时自动加入，CLI 下没有管理员帮忙添加
        if !self.access.check_permission(&self.user_id).await {
            self.access
                .add_to_whitelist(&self.user_id, None, None)
                .await
                .context("初始化本地用户失败")?;
        }
        self.queue.start().await;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.queue.stop().await;
    }

    pub async fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if line == "/naihelp" {
            println!("{}", help_text());
        } else if line.starts_with("/nainl") {
            self.handle_nl_command(line).await;
        } else if line.starts_with("/nai") {
            self.handle_generation_command(line).await;
        } else {
            println!("未识别到指令，输入 /naihelp 查看用法");
        }
    }

    async fn handle_generation_command(&self, line: &str) {
        let parsed = match parse_generation_command(line) {
            Ok(parsed) => parsed,
            Err(error) => {
                println!("{error}");
                return;
            }
        };
        if let Err(error) = self.enqueue_generation(parsed, None).await {
            println!("{error}");
        }
    }

    async fn handle_nl_command(&self, line: &str) {
        let Some(nl) = &self.nl else {
            println!("自然语言处理功能未启用，请检查配置中的 nl 设置");
            return;
        };
        let user_input = line.trim_start_matches("/nainl").trim();
        if user_input.is_empty() {
            println!("请输入图像描述");
            return;
        }

        println!("自然语言交由 LLM 分析中，请稍后~");

        let nl_config = self.config.nl.as_ref();
        let quality_words = nl_config
            .map(|c| c.quality_words_override.as_str())
            .filter(|q| !q.is_empty())
            .unwrap_or(&self.config.quality_words);

        let result = match nl.process(user_input, true, quality_words).await {
            Ok(result) => result,
            Err(error) => {
                println!("自然语言处理失败：{error:#}");
                return;
            }
        };

        let mut command_text = format!("/nai {}", result.params_text);
        if let Some(negative) = nl_config
            .map(|c| c.negative_preset_override.as_str())
            .filter(|n| !n.is_empty())
        {
            if !command_text.contains("负面词条") {
                command_text.push_str(&format!(" 负面词条:<{negative}>"));
            }
        }

        let parsed = match parse_generation_command(&command_text) {
            Ok(parsed) => parsed,
            Err(error) => {
                println!("参数解析失败：{error}");
                return;
            }
        };
        if let Err(error) = self.enqueue_generation(parsed, result.model_name).await {
            println!("{error}");
        }
    }

    /// 权限、额度、图片槽位解析，通过后编译入队。
    async fn enqueue_generation(
        &self,
        parsed: ParsedParams,
        llm_model: Option<String>,
    ) -> Result<()> {
        let model = parsed
            .model_name
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        if !MODELS.contains(&model.as_str()) {
            anyhow::bail!("模型参数无效");
        }

        if !self.access.check_permission(&self.user_id).await {
            anyhow::bail!("您不在白名单中");
        }
        if !self.access.check_quota(&self.user_id).await? {
            anyhow::bail!("每日限额已达");
        }

        // CLI 下图片槽位就是文件路径
        let base_image = match &parsed.base_image {
            Some(slot) => Some(
                image_to_base64(slot)
                    .map_err(|_| anyhow::anyhow!("未找到指定的底图，请确认图片路径"))?,
            ),
            None => None,
        };
        let character_reference = match &parsed.character_reference {
            Some(slot) => Some(
                image_to_base64(slot)
                    .map_err(|_| anyhow::anyhow!("未找到指定的角色参考图，请确认图片路径"))?,
            ),
            None => None,
        };

        let (payload, seed) =
            self.api
                .build_payload(&parsed, &model, base_image, None, character_reference)?;

        self.queue.enqueue(GenerationJob {
            payload,
            seed,
            model,
            user_id: self.user_id.clone(),
            llm_model,
        });
        println!("已加入生成队列，请稍候~");
        Ok(())
    }
}

fn help_text() -> &'static str {
    r"/nai 正面词条:<主要提示词，必填>
     负面词条:<不需要的内容；留空则使用模型预设>
     是否有福瑞:<是/否，默认否；是时会在提示词前添加 fur dataset>
     添加质量词:<是/否，默认否；是时按模型追加质量词>
     底图:<图生图使用的图片路径，留空为文本生图>
     底图重绘强度:<0~1，默认0.7；越低越接近原图>
     底图加噪强度:<0~0.99，默认0；越高越接近文本描述>
     分辨率:<竖图/横图/方图，默认竖图>
     步数:<1~28 的整数，默认28>
     指导系数:<0~10 的数字，默认5>
     重采样系数:<0~1 的数字，默认0>
     种子:<整数，留空则随机>
     采样器:<k_euler/k_euler_ancestral/k_dpmpp_2m/...，默认 k_euler_ancestral>
     角色是否分区:<是/否；是时可指定角色位置>
     角色1正面词条:<角色提示词> 角色1负面词条:<角色负面词条> 角色1位置:<A1~E5>
     角色参考:<角色参考图路径> 角色参考强度:<0~1，默认1>
     是否注意原画风:<是/否，默认否>
     模型:<模型名称，留空使用配置 default_model>
/nainl <自然语言描述>  由 LLM 转换为提示词后生成"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        Config {
            nai_token: "test-token".to_string(),
            proxy: None,
            default_model: "nai-diffusion-4-5-curated".to_string(),
            image_save_path: dir.path().join("outputs").to_string_lossy().to_string(),
            whitelist_path: dir.path().join("whitelist.json").to_string_lossy().to_string(),
            default_daily_limit: 2,
            quality_words: "best quality, masterpiece".to_string(),
            min_delay: 0.0,
            max_delay: 0.01,
            nl: None,
        }
    }

    #[tokio::test]
    async fn test_user_outside_whitelist_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::new(test_config(&dir), "tester".to_string()).unwrap();

        let parsed = parse_generation_command("/nai 正面词条:<1girl>").unwrap();
        let err = app.enqueue_generation(parsed, None).await.unwrap_err();
        assert_eq!(err.to_string(), "您不在白名单中");
    }

    #[tokio::test]
    async fn test_start_whitelists_local_user() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::new(test_config(&dir), "tester".to_string()).unwrap();
        app.start().await.unwrap();

        // 底图路径不存在：说明已通过白名单和额度检查，卡在图片槽位解析
        let parsed =
            parse_generation_command("/nai 正面词条:<1girl> 底图:<missing.png>").unwrap();
        let err = app.enqueue_generation(parsed, None).await.unwrap_err();
        assert_eq!(err.to_string(), "未找到指定的底图，请确认图片路径");

        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::new(test_config(&dir), "tester".to_string()).unwrap();
        app.start().await.unwrap();

        let parsed =
            parse_generation_command("/nai 正面词条:<1girl> 模型:<sdxl-turbo>").unwrap();
        let err = app.enqueue_generation(parsed, None).await.unwrap_err();
        assert_eq!(err.to_string(), "模型参数无效");

        app.shutdown().await;
    }
}
