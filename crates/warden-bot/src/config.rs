use anyhow::{Context, Result};

/// Chat-gateway connection settings.
#[derive(Debug, Clone)]
pub struct GatewayEndpoint {
    pub url: String,
    pub token: String,
}

/// Generative-language endpoint (OpenAI-compatible completions API).
#[derive(Debug, Clone)]
pub struct LlmEndpoint {
    pub url: String,
    pub api_key: String,
    pub model: String,
}

/// Top-level bot configuration, loaded from the environment at startup.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub gateway: GatewayEndpoint,
    pub llm: LlmEndpoint,
}

impl BotConfig {
    /// Load from the environment.
    ///
    /// `WARDEN_GATEWAY_TOKEN` and `WARDEN_LLM_API_KEY` are required;
    /// everything else has a default.
    pub fn from_env() -> Result<Self> {
        let gateway = GatewayEndpoint {
            url: std::env::var("WARDEN_GATEWAY_URL")
                .unwrap_or_else(|_| "ws://localhost:9443/gateway".into()),
            token: std::env::var("WARDEN_GATEWAY_TOKEN")
                .context("WARDEN_GATEWAY_TOKEN is required")?,
        };

        let llm = LlmEndpoint {
            url: std::env::var("WARDEN_LLM_URL").unwrap_or_else(|_| {
                "https://generativelanguage.googleapis.com/v1beta/openai".into()
            }),
            api_key: std::env::var("WARDEN_LLM_API_KEY")
                .context("WARDEN_LLM_API_KEY is required")?,
            model: std::env::var("WARDEN_LLM_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".into()),
        };

        Ok(Self { gateway, llm })
    }
}

/// Check if the completions endpoint is reachable (GET /models).
pub async fn check_endpoint(url: &str) -> bool {
    let models_url = format!("{url}/models");
    match reqwest::Client::new()
        .get(&models_url)
        .timeout(std::time::Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}
