//! 白名单与每日限额管理。

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuota {
    pub daily_limit: u32,
    pub remaining: u32,
    pub last_reset: String,
    #[serde(default)]
    pub last_used_at: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupEntry {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WhitelistData {
    #[serde(default)]
    users: BTreeMap<String, UserQuota>,
    #[serde(default)]
    groups: BTreeMap<String, GroupEntry>,
}

/// 对白名单、限额及每日使用做管理。所有修改立即落盘。
pub struct AccessControl {
    storage_path: PathBuf,
    default_daily_limit: u32,
    data: Mutex<WhitelistData>,
}

fn today() -> String {
    Local::now().date_naive().to_string()
}

impl AccessControl {
    pub fn new(storage_path: impl Into<PathBuf>, default_daily_limit: u32) -> Result<Self> {
        let storage_path = storage_path.into();
        let data = Self::load(&storage_path)?;
        Ok(Self {
            storage_path,
            default_daily_limit,
            data: Mutex::new(data),
        })
    }

    fn load(path: &Path) -> Result<WhitelistData> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let data = WhitelistData::default();
            Self::save(path, &data)?;
            return Ok(data);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取白名单失败: {}", path.display()))?;
        // 文件损坏时重置为空表，而不是让整个插件启动失败
        Ok(serde_json::from_str(&content).unwrap_or_default())
    }

    fn save(path: &Path, data: &WhitelistData) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(data)?;
        fs::write(path, content)
            .with_context(|| format!("写入白名单失败: {}", path.display()))
    }

    fn auto_reset(user: &mut UserQuota) {
        let today = today();
        if user.last_reset != today {
            user.last_reset = today;
            user.remaining = user.daily_limit;
        }
    }

    pub async fn check_permission(&self, user_id: &str) -> bool {
        self.data.lock().await.users.contains_key(user_id)
    }

    pub async fn check_group_permission(&self, group_id: &str) -> bool {
        self.data.lock().await.groups.contains_key(group_id)
    }

    pub async fn add_to_whitelist(
        &self,
        user_id: &str,
        limit: Option<u32>,
        nickname: Option<String>,
    ) -> Result<UserQuota> {
        let mut data = self.data.lock().await;
        let daily_limit = limit.unwrap_or(self.default_daily_limit);
        let user = UserQuota {
            daily_limit,
            remaining: daily_limit,
            last_reset: today(),
            last_used_at: None,
            nickname,
        };
        data.users.insert(user_id.to_string(), user.clone());
        Self::save(&self.storage_path, &data)?;
        Ok(user)
    }

    pub async fn remove_from_whitelist(&self, user_id: &str) -> Result<bool> {
        let mut data = self.data.lock().await;
        if data.users.remove(user_id).is_some() {
            Self::save(&self.storage_path, &data)?;
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn add_group(&self, group_id: &str, name: Option<String>) -> Result<GroupEntry> {
        let mut data = self.data.lock().await;
        let entry = GroupEntry { name };
        data.groups.insert(group_id.to_string(), entry.clone());
        Self::save(&self.storage_path, &data)?;
        Ok(entry)
    }

    pub async fn remove_group(&self, group_id: &str) -> Result<bool> {
        let mut data = self.data.lock().await;
        if data.groups.remove(group_id).is_some() {
            Self::save(&self.storage_path, &data)?;
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn set_quota(
        &self,
        user_id: &str,
        limit: u32,
        nickname: Option<String>,
    ) -> Result<UserQuota> {
        if limit == 0 {
            anyhow::bail!("每日限额必须大于0");
        }
        let mut data = self.data.lock().await;
        let user = match data.users.get_mut(user_id) {
            Some(user) => {
                user.daily_limit = limit;
                user.remaining = user.remaining.min(limit);
                if nickname.is_some() {
                    user.nickname = nickname;
                }
                user.clone()
            }
            None => {
                let user = UserQuota {
                    daily_limit: limit,
                    remaining: limit,
                    last_reset: today(),
                    last_used_at: None,
                    nickname,
                };
                data.users.insert(user_id.to_string(), user.clone());
                user
            }
        };
        Self::save(&self.storage_path, &data)?;
        Ok(user)
    }

    /// 当日额度是否还有剩余。跨天自动重置。
    pub async fn check_quota(&self, user_id: &str) -> Result<bool> {
        let mut data = self.data.lock().await;
        let Some(user) = data.users.get_mut(user_id) else {
            return Ok(false);
        };
        Self::auto_reset(user);
        let remaining = user.remaining;
        Self::save(&self.storage_path, &data)?;
        Ok(remaining > 0)
    }

    pub async fn consume_quota(&self, user_id: &str) -> Result<()> {
        let mut data = self.data.lock().await;
        let Some(user) = data.users.get_mut(user_id) else {
            anyhow::bail!("用户不在白名单");
        };
        Self::auto_reset(user);
        if user.remaining == 0 {
            anyhow::bail!("用户已达到每日限额");
        }
        user.remaining -= 1;
        user.last_used_at = Some(Local::now().to_rfc3339());
        Self::save(&self.storage_path, &data)?;
        Ok(())
    }

    pub async fn get_user_info(&self, user_id: &str) -> Result<Option<UserQuota>> {
        let mut data = self.data.lock().await;
        let Some(user) = data.users.get_mut(user_id) else {
            return Ok(None);
        };
        Self::auto_reset(user);
        let snapshot = user.clone();
        Self::save(&self.storage_path, &data)?;
        Ok(Some(snapshot))
    }
}
