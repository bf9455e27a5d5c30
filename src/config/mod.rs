mod settings;

pub use settings::{InterceptorConfig, TomlConfig, TomlStorageConfig, DEFAULT_STORAGE_FILE};
