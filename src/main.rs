use std::path::Path;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use prompt2image::app::App;
use prompt2image::config::{Config, CONFIG_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load or Create Config
    Config::ensure_default(Path::new(CONFIG_PATH))?;
    let config = match Config::load() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("Error loading config: {error}");
            eprintln!("Please ensure 'config.yml' exists with a valid NovelAI token.");
            return Err(error);
        }
    };
    config.ensure_directories()?;

    // 2. Initialize pipeline (API client, whitelist, queue worker)
    let user_id = std::env::args().nth(1).unwrap_or_else(|| "local".to_string());
    let app = App::new(config, user_id)?;
    app.start().await?;

    println!("输入 /nai 指令开始生成，/naihelp 查看用法，exit 退出");

    // 3. REPL over stdin, standing in for the chat adapter
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim() == "exit" {
            break;
        }
        app.handle_line(&line).await;
    }

    // 4. Drain the queue before exiting
    app.shutdown().await;
    Ok(())
}
