use ograph_format::{CompressionMode, CompressionSettings, TableLoadOptions};
use serde::{Deserialize, Serialize};

/// What the loader does when an export fails to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// Keep reading the remaining exports and report every failure at the end.
    Accumulate,
    /// Abort on the first failure.
    FailFast,
}

impl Default for ErrorMode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Accumulate
        } else {
            Self::FailFast
        }
    }
}

/// How CRC and layout checks are enforced on load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityPolicy {
    /// Every check runs and every mismatch is an error.
    Strict,
    /// Table checks are skipped; export and buffer mismatches are logged and
    /// the load continues with the stored bytes.
    Lenient,
    /// No checks.
    Off,
}

impl Default for IntegrityPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Strict
        } else {
            Self::Lenient
        }
    }
}

impl IntegrityPolicy {
    pub fn is_enabled(self) -> bool {
        self != Self::Off
    }
}

/// Configuration for [`BinarySaver`](crate::BinarySaver).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaverConfig {
    pub compression: CompressionMode,
    pub compression_level: i32,
    /// Buffers that do not shrink below this percentage are stored raw.
    pub compression_threshold_percent: u8,
    /// Record a CRC32 per export body.
    pub protected_layout: bool,
}

impl Default for SaverConfig {
    fn default() -> Self {
        let compression = CompressionSettings::default();
        Self {
            compression: compression.mode,
            compression_level: compression.level,
            compression_threshold_percent: compression.threshold_percent,
            protected_layout: true,
        }
    }
}

impl SaverConfig {
    /// Store every buffer raw.
    pub fn uncompressed() -> Self {
        Self {
            compression: CompressionMode::None,
            ..Default::default()
        }
    }

    pub fn compression_settings(&self) -> CompressionSettings {
        CompressionSettings {
            mode: self.compression,
            level: self.compression_level,
            threshold_percent: self.compression_threshold_percent,
        }
    }
}

/// Configuration for [`BinaryLoader`](crate::BinaryLoader).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub error_mode: ErrorMode,
    pub integrity: IntegrityPolicy,
    /// Turn a failed import into a load error instead of a null reference.
    pub fail_on_missing_imports: bool,
    /// Load imports flagged as must-load. When off, only resident imports
    /// are bound.
    pub load_imports: bool,
    /// Largest chunk, in bytes, the loader accepts.
    pub max_table_size: u32,
    /// Read and verify every buffer during the load instead of on first
    /// access.
    pub preload_buffers: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            error_mode: ErrorMode::default(),
            integrity: IntegrityPolicy::default(),
            fail_on_missing_imports: false,
            load_imports: true,
            max_table_size: 64 * 1024 * 1024,
            preload_buffers: false,
        }
    }
}

impl LoaderConfig {
    /// Check everything and report every failure.
    pub fn diagnostic() -> Self {
        Self {
            error_mode: ErrorMode::Accumulate,
            integrity: IntegrityPolicy::Strict,
            ..Default::default()
        }
    }

    /// Stop at the first failure and only log integrity problems.
    pub fn fail_fast() -> Self {
        Self {
            error_mode: ErrorMode::FailFast,
            integrity: IntegrityPolicy::Lenient,
            ..Default::default()
        }
    }

    pub fn table_options(&self) -> TableLoadOptions {
        TableLoadOptions {
            verify_crc: self.integrity == IntegrityPolicy::Strict,
            max_table_size: self.max_table_size as u64,
        }
    }
}

/// Saver and loader settings, typically read from a TOML file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub saver: SaverConfig,
    pub loader: LoaderConfig,
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }
}
