//! 图像编解码辅助：base64、PNG 重编码、ZIP 响应解包。

use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::ImageFormat;

/// 读取图片文件，统一转成 RGB8 PNG 后编码为 base64。
pub fn image_to_base64(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let img = image::open(path).with_context(|| format!("读取图片失败: {}", path.display()))?;
    let rgb = img.to_rgb8();
    let mut buffer = Cursor::new(Vec::new());
    rgb.write_to(&mut buffer, ImageFormat::Png)
        .context("PNG 编码失败")?;
    Ok(STANDARD.encode(buffer.into_inner()))
}

pub fn base64_to_image(encoded: &str) -> Result<Vec<u8>> {
    STANDARD.decode(encoded).context("base64 解码失败")
}

pub fn save_image_from_bytes(bytes: &[u8], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, bytes).with_context(|| format!("保存图片失败: {}", path.display()))
}

/// 从 NovelAI 返回的 ZIP 数据中提取指定索引的图像。
pub fn extract_zip_image(zip_bytes: &[u8], index: usize) -> Result<Vec<u8>> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(zip_bytes)).context("响应不是合法的ZIP数据")?;
    let name = format!("image_{index}.png");
    let mut file = archive
        .by_name(&name)
        .with_context(|| format!("ZIP中未找到{name}"))?;
    let mut bytes = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}
