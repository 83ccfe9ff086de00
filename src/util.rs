//! Environment overrides, usually provided through a `.env` file

const PORTER_CONFIG: &str = "PORTER_CONFIG";

const DEFAULT_CONFIG: &str = "./porter.json";

/// Config file path from `PORTER_CONFIG`, or `./porter.json`
pub fn get_config_path() -> String {
    std::env::var(PORTER_CONFIG).unwrap_or_else(|_| DEFAULT_CONFIG.to_string())
}

const PORTER_API_TOKEN: &str = "PORTER_API_TOKEN";

/// Debug API token from `PORTER_API_TOKEN`, overriding the config file
pub fn get_api_token() -> Option<String> {
    std::env::var(PORTER_API_TOKEN)
        .ok()
        .filter(|token| !token.is_empty())
}

const PORTER_REPLICAS: &str = "PORTER_REPLICAS";

/// Replica count from `PORTER_REPLICAS`, if set to a positive number
pub fn get_replicas() -> Option<usize> {
    std::env::var(PORTER_REPLICAS)
        .ok()
        .and_then(|replicas| replicas.parse().ok())
        .filter(|replicas| *replicas > 0)
}
