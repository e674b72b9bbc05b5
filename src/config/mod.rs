use std::env;
use std::path::PathBuf;

/// Base path key of the production storage root.
pub const FILE_BASE_DEFAULT: &str = "FILE_BASE_DEFAULT";
/// Base path key of the storage root used outside production.
pub const TEST_FILE_BASE_DEFAULT: &str = "TEST_FILE_BASE_DEFAULT";

/// Deployment flavour, read from `RUNTIME`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    Product,
    Preview,
    Develop,
    Test,
}

impl Runtime {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "PRODUCT" => Some(Self::Product),
            "PREVIEW" => Some(Self::Preview),
            "DEVELOP" => Some(Self::Develop),
            "TEST" => Some(Self::Test),
            _ => None,
        }
    }

    pub fn is_product(self) -> bool {
        self == Self::Product
    }
}

/// Storage and upload configuration for the file-set engine
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Runtime environment (default: Develop)
    pub runtime: Runtime,

    /// Production storage root (default: "./files/data")
    pub file_base_default: PathBuf,

    /// Non-production storage root (default: "./files/test_data")
    pub test_file_base_default: PathBuf,

    /// Production temp root for staged uploads and delete backups
    pub temp_file_path: PathBuf,

    /// Non-production temp root
    pub test_temp_file_path: PathBuf,

    /// Maximum size of one uploaded file in bytes (default: 5 MB)
    pub max_upload_size: usize,

    /// Maximum size of a whole multipart request in bytes (default: 50 MB)
    pub max_request_size: usize,

    /// Maximum length of the encoded upload filename (default: 255)
    pub max_filename_length: usize,

    /// Thumbnail width in pixels (default: 200)
    pub thumbnail_width: u32,

    /// Thumbnail JPEG quality (default: 70)
    pub thumbnail_quality: u8,

    /// Age after which orphaned temp files are swept (default: 24)
    pub temp_cleanup_age_hours: u64,

    /// Interval between temp sweeps in seconds (default: 3600)
    pub temp_cleanup_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            runtime: Runtime::Develop,
            file_base_default: PathBuf::from("./files/data"),
            test_file_base_default: PathBuf::from("./files/test_data"),
            temp_file_path: PathBuf::from("./files/temp"),
            test_temp_file_path: PathBuf::from("./files/test_temp"),
            max_upload_size: 5 * 1024 * 1024, // 5 MB
            max_request_size: 50 * 1024 * 1024,
            max_filename_length: 255,
            thumbnail_width: 200,
            thumbnail_quality: 70,
            temp_cleanup_age_hours: 24,
            temp_cleanup_interval_secs: 3600,
        }
    }
}

impl StorageConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            runtime: env::var("RUNTIME")
                .ok()
                .and_then(|v| Runtime::parse(&v))
                .unwrap_or(default.runtime),

            file_base_default: env::var(FILE_BASE_DEFAULT)
                .map(PathBuf::from)
                .unwrap_or(default.file_base_default),

            test_file_base_default: env::var(TEST_FILE_BASE_DEFAULT)
                .map(PathBuf::from)
                .unwrap_or(default.test_file_base_default),

            temp_file_path: env::var("TEMP_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or(default.temp_file_path),

            test_temp_file_path: env::var("TEST_TEMP_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or(default.test_temp_file_path),

            max_upload_size: env::var("MAX_UPLOAD_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_upload_size),

            max_request_size: env::var("MAX_REQUEST_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_request_size),

            max_filename_length: env::var("MAX_FILENAME_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_filename_length),

            thumbnail_width: env::var("THUMBNAIL_WIDTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.thumbnail_width),

            thumbnail_quality: env::var("THUMBNAIL_QUALITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.thumbnail_quality),

            temp_cleanup_age_hours: env::var("TEMP_CLEANUP_AGE_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.temp_cleanup_age_hours),

            temp_cleanup_interval_secs: env::var("TEMP_CLEANUP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.temp_cleanup_interval_secs),
        }
    }

    /// Create config for development (test roots)
    pub fn development() -> Self {
        Self {
            runtime: Runtime::Develop,
            ..Self::default()
        }
    }

    /// Create config for production. Roots must come from the environment.
    pub fn production() -> Self {
        Self {
            runtime: Runtime::Product,
            ..Self::from_env()
        }
    }

    /// Config whose every root lives under `base`. Used by tests and tooling.
    pub fn rooted_at(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            runtime: Runtime::Test,
            file_base_default: base.join("data"),
            test_file_base_default: base.join("test_data"),
            temp_file_path: base.join("temp"),
            test_temp_file_path: base.join("test_temp"),
            ..Self::default()
        }
    }

    /// Key of the storage root new file sets are created under.
    pub fn active_base_path_key(&self) -> &'static str {
        if self.runtime.is_product() {
            FILE_BASE_DEFAULT
        } else {
            TEST_FILE_BASE_DEFAULT
        }
    }

    pub fn active_temp_root(&self) -> &PathBuf {
        if self.runtime.is_product() {
            &self.temp_file_path
        } else {
            &self.test_temp_file_path
        }
    }
}
