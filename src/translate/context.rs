//! Request-scoped translation state.

use super::anthropic_types::MessagesRequest;
use crate::config::ProxyConfig;

/// `max_tokens` assumed when the client leaves it out.
pub const DEFAULT_MAX_TOKENS: u64 = 1024;

/// Everything the translators need to know about one request beyond the request body.
///
/// Built per request from the immutable [`ProxyConfig`] and dropped when the response
/// completes; never shared between requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationContext {
    /// Model name the client asked for; echoed back in responses.
    pub requested_model: String,
    /// Model id sent to the provider.
    pub upstream_model: String,
    pub system: Option<String>,
    /// Output ceiling after clamping.
    pub max_tokens: u64,
    /// Set when the client's `max_tokens` exceeded the ceiling.
    pub clamped_from: Option<u64>,
}

impl TranslationContext {
    pub fn new(req: &MessagesRequest, config: &ProxyConfig) -> Self {
        let upstream_model = config
            .models
            .get(&req.model)
            .cloned()
            .unwrap_or_else(|| config.provider.model.clone());

        let ceiling = config.provider.max_output_tokens;
        let requested = req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let (max_tokens, clamped_from) = if requested > ceiling {
            (ceiling, Some(requested))
        } else {
            (requested, None)
        };

        Self {
            requested_model: req.model.clone(),
            upstream_model,
            system: req
                .system
                .as_ref()
                .map(|s| s.as_text())
                .filter(|s| !s.is_empty()),
            max_tokens,
            clamped_from,
        }
    }
}
