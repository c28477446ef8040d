//! Đọc file cấu hình JSON và ghép lên cấu hình mặc định.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use timeslice_core::SliceConfig;

/// Các trường đều tùy chọn; trường vắng mặt giữ giá trị mặc định.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    extension: Option<String>,
    #[serde(default)]
    excluded_name_fragments: Option<Vec<String>>,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    connect_timeout_secs: Option<u64>,
    #[serde(default)]
    request_timeout_secs: Option<u64>,
    #[serde(default)]
    workers: Option<usize>,
}

impl From<FileConfig> for SliceConfig {
    fn from(cfg: FileConfig) -> Self {
        let mut base = SliceConfig::default();
        if let Some(extension) = cfg.extension {
            base.input.extension = extension;
        }
        if let Some(fragments) = cfg.excluded_name_fragments {
            base.input.excluded_name_fragments = fragments;
        }
        if let Some(endpoint) = cfg.endpoint {
            base.replay.endpoint = endpoint;
        }
        if let Some(secs) = cfg.connect_timeout_secs {
            base.replay.connect_timeout_secs = secs;
        }
        if let Some(secs) = cfg.request_timeout_secs {
            base.replay.request_timeout_secs = secs;
        }
        if let Some(workers) = cfg.workers {
            base.replay.workers = workers;
        }
        base
    }
}

/// Cấu hình mặc định, hoặc ghép từ file nếu có.
pub fn load(path: Option<&Path>) -> anyhow::Result<SliceConfig> {
    let Some(path) = path else {
        return Ok(SliceConfig::default());
    };

    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Không đọc được file cấu hình {path:?}"))?;
    let cfg: FileConfig = serde_json::from_str(&data)
        .with_context(|| format!("File cấu hình không hợp lệ {path:?}"))?;
    Ok(SliceConfig::from(cfg))
}
