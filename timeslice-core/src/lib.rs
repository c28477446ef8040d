//! Kiểu dữ liệu dùng chung cho việc cắt bundle theo thời gian và phát lại.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Hậu tố của file snapshot trong mỗi thư mục thời điểm.
pub const BUNDLE_SUFFIX: &str = ".bundle.json";

/// Hậu tố của file kết quả dự đoán, nằm cạnh file snapshot.
pub const PREDICTION_SUFFIX: &str = ".prediction.json";

/// Giá trị `resourceType` mặc định khi bundle gốc không khai báo.
pub const DEFAULT_RESOURCE_TYPE: &str = "Bundle";

/// Cấu hình tổng hợp cho cả chế độ batch lẫn chế độ phát lại.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SliceConfig {
    pub input: InputFilter,
    pub replay: ReplayConfig,
}

/// Bộ lọc tên file đầu vào.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputFilter {
    /// Phần mở rộng được chấp nhận (không có dấu chấm).
    pub extension: String,
    /// File có tên chứa một trong các chuỗi này sẽ bị bỏ qua.
    pub excluded_name_fragments: Vec<String>,
}

impl Default for InputFilter {
    fn default() -> Self {
        Self {
            extension: "json".to_string(),
            excluded_name_fragments: vec!["hospital".to_string(), "practitioner".to_string()],
        }
    }
}

impl InputFilter {
    /// Kiểm tra một tên file có được đưa vào xử lý hay không.
    pub fn accepts(&self, file_name: &str) -> bool {
        let Some((_, extension)) = file_name.rsplit_once('.') else {
            return false;
        };
        extension == self.extension
            && !self
                .excluded_name_fragments
                .iter()
                .any(|fragment| file_name.contains(fragment.as_str()))
    }
}

/// Thiết lập cho chế độ phát lại tới endpoint dự đoán.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayConfig {
    pub endpoint: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Số worker chạy song song.
    pub workers: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/predict".to_string(),
            connect_timeout_secs: 3,
            request_timeout_secs: 10,
            workers: 4,
        }
    }
}

impl ReplayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Khóa định danh một snapshot: bệnh nhân và chuỗi thời gian gốc.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub patient_id: String,
    pub raw_timestamp: String,
}

impl SnapshotKey {
    pub fn new(patient_id: impl Into<String>, raw_timestamp: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            raw_timestamp: raw_timestamp.into(),
        }
    }

    /// Tên thư mục thời điểm chứa snapshot.
    pub fn directory_name(&self) -> String {
        sanitize(&self.raw_timestamp)
    }

    /// Tên file snapshot trong thư mục thời điểm.
    pub fn bundle_file_name(&self) -> String {
        format!("{}{BUNDLE_SUFFIX}", sanitize(&self.patient_id))
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.patient_id, self.raw_timestamp)
    }
}

/// Tên file kết quả dự đoán cho một bệnh nhân.
pub fn prediction_file_name(patient_id: &str) -> String {
    format!("{}{PREDICTION_SUFFIX}", sanitize(patient_id))
}

/// Thay các ký tự không hợp lệ trong tên file bằng `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|ch| match ch {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

/// Các dạng thời gian có offset được chấp nhận: giây và phần lẻ của giây là tùy chọn.
const OFFSET_DATE_TIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M%:z"];

/// Đọc thời gian dạng `2020-01-01T00:00:00+00:00`, `...Z` hoặc `2020-01-01T00:00Z`.
///
/// Bắt buộc có `T` viết hoa; offset là `Z` hoặc `±HH:MM`.
pub fn parse_offset_datetime(value: &str) -> Option<DateTime<FixedOffset>> {
    let normalised;
    let value = match value.strip_suffix('Z') {
        Some(local) => {
            normalised = format!("{local}+00:00");
            normalised.as_str()
        }
        None => value,
    };

    OFFSET_DATE_TIME_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(value, format).ok())
}

/// Thời điểm phát lại, đọc từ tên thư mục đã được `sanitize`.
///
/// Tên có dạng `yyyy-MM-ddTHH_mm_ss<offset>`, trong đó `_` thay cho `:`.
/// Offset có thể là `Z`, `+HH_MM` hoặc `+HH:MM`; giây và phần lẻ của giây là tùy chọn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplayInstant(DateTime<FixedOffset>);

impl ReplayInstant {
    pub fn from_name(name: &str) -> Result<Self, SliceError> {
        let restored = name.replace('_', ":");
        parse_offset_datetime(&restored)
            .map(Self)
            .ok_or_else(|| SliceError::Parse(format!("invalid replay instant {name:?}")))
    }

    pub fn as_datetime(&self) -> DateTime<FixedOffset> {
        self.0
    }

    /// Khoảng chờ tính từ `now`; thời điểm trong quá khứ cho ra 0.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        self.0
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn delay_from_now(&self) -> Duration {
        self.delay_from(Utc::now())
    }
}

impl From<DateTime<FixedOffset>> for ReplayInstant {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self(value)
    }
}

impl From<DateTime<Utc>> for ReplayInstant {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.into())
    }
}

impl FromStr for ReplayInstant {
    type Err = SliceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

impl fmt::Display for ReplayInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339())
    }
}

/// Lỗi chung khi cắt bundle hoặc ghi kết quả.
#[derive(Debug, thiserror::Error)]
pub enum SliceError {
    #[error("document is not a JSON object")]
    NotAnObject,
    #[error("could not read document: {0}")]
    Parse(String),
    #[error("could not serialize snapshot: {0}")]
    Serialize(String),
    #[error("bundle has no Patient resource with an id")]
    MissingPatient,
    #[error("bundle has no observation with a usable timestamp")]
    NoObservations,
    #[error("input directory not found: {}", .0.display())]
    InputNotFound(PathBuf),
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SliceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Lỗi có thể bỏ qua (chuyển sang file tiếp theo) hay phải dừng cả lượt chạy.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotAnObject | Self::Parse(_) | Self::MissingPatient | Self::NoObservations
        )
    }
}
