//! Known OpenAI-compatible providers.
//!
//! Used for two cosmetic purposes only: naming the provider in logs and the startup banner
//! (inferred from the base URL), and filling in a default base URL when the user picks a
//! provider by name. Translation never branches on the provider.

/// Display name used when the base URL matches no known provider.
pub const UNKNOWN_PROVIDER: &str = "custom";

#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub base_url: &'static str,
    /// Lowercase substrings identifying this provider in a base URL.
    pub url_markers: &'static [&'static str],
}

const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        url_markers: &["groq.com"],
    },
    ProviderPreset {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        url_markers: &["openai.com"],
    },
    ProviderPreset {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        url_markers: &["openrouter.ai"],
    },
    ProviderPreset {
        name: "ollama",
        base_url: "http://localhost:11434/v1",
        url_markers: &["ollama", "localhost:11434"],
    },
    ProviderPreset {
        name: "anthropic",
        base_url: "https://api.anthropic.com/v1",
        url_markers: &["anthropic.com", "claude"],
    },
    ProviderPreset {
        name: "novita",
        base_url: "https://api.novita.ai/v3/openai",
        url_markers: &["novita"],
    },
    ProviderPreset {
        name: "baseten",
        base_url: "https://inference.baseten.co/v1",
        url_markers: &["baseten"],
    },
    ProviderPreset {
        name: "fireworks",
        base_url: "https://api.fireworks.ai/inference/v1",
        url_markers: &["fireworks.ai"],
    },
    ProviderPreset {
        name: "together",
        base_url: "https://api.together.xyz/v1",
        url_markers: &["together.xyz"],
    },
    ProviderPreset {
        name: "grok",
        base_url: "https://api.x.ai/v1",
        url_markers: &["x.ai"],
    },
    ProviderPreset {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        url_markers: &["deepseek.com"],
    },
];

impl ProviderPreset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static ProviderPreset> {
        let name = name.to_lowercase();
        PRESETS.iter().find(|p| p.name == name)
    }

    /// First preset whose marker occurs in `base_url`; table order decides ties.
    #[must_use]
    pub fn from_base_url(base_url: &str) -> Option<&'static ProviderPreset> {
        let url = base_url.to_lowercase();
        PRESETS
            .iter()
            .find(|p| p.url_markers.iter().any(|m| url.contains(m)))
    }

    #[must_use]
    pub fn all() -> &'static [ProviderPreset] {
        PRESETS
    }
}

/// Display name for the provider behind `base_url`.
#[must_use]
pub fn infer_provider_name(base_url: &str) -> &'static str {
    ProviderPreset::from_base_url(base_url).map_or(UNKNOWN_PROVIDER, |p| p.name)
}
