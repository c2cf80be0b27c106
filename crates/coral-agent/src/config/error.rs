use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: set the {env_var} environment variable")]
    MissingEnvVar { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration error: {0}")]
    Other(#[from] ::config::ConfigError),
}

/// The `CORAL_*` variable that overrides a dotted settings path
pub fn to_env_var(field_path: &str) -> String {
    format!("CORAL_{}", field_path.to_uppercase().replace('.', "__"))
}
