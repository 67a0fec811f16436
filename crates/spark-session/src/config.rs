use serde::{Deserialize, Serialize};
use spark_buffer::PoolConfig;

use crate::ConfigError;

/// 会话引擎配置。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 读缓冲大小、出站队列容量与合并写阈值共同决定单会话的内存占用与系统调用频率，
///   需要在宿主层统一调参，而不是散落在各传输实现中。
///
/// ## 逻辑 (How)
/// - 结构体整体 `#[serde(default)]`，配置文件只需给出关心的字段；
/// - [`from_toml_str`](Self::from_toml_str) 解析后立即执行 [`validate`](Self::validate)。
///
/// ## 契约 (What)
/// - `read_buffer_size`：每个会话读缓冲的逻辑容量，同时是单帧的最大长度；
/// - `write_queue_capacity`：出站队列最多容纳的缓冲数，满时写入方阻塞；
/// - `write_merge_threshold`：合并写时新建缓冲的目标上限（字节）；
/// - `buffer_pool`：跨会话共享缓冲池的槽位配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub read_buffer_size: usize,
    pub write_queue_capacity: usize,
    pub write_merge_threshold: usize,
    pub buffer_pool: PoolConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 512,
            write_queue_capacity: 512,
            write_merge_threshold: 32 * 1024,
            buffer_pool: PoolConfig::default(),
        }
    }
}

impl SessionConfig {
    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验所有字段均为正数。
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("read_buffer_size", self.read_buffer_size),
            ("write_queue_capacity", self.write_queue_capacity),
            ("write_merge_threshold", self.write_merge_threshold),
            ("buffer_pool.slot_size", self.buffer_pool.slot_size),
        ];
        match fields.into_iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(ConfigError::Zero { field }),
            None => Ok(()),
        }
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_write_queue_capacity(mut self, capacity: usize) -> Self {
        self.write_queue_capacity = capacity;
        self
    }

    pub fn with_write_merge_threshold(mut self, threshold: usize) -> Self {
        self.write_merge_threshold = threshold;
        self
    }

    pub fn with_buffer_pool(mut self, pool: PoolConfig) -> Self {
        self.buffer_pool = pool;
        self
    }
}
