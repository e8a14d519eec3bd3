use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::logging::SharedLogger;
use crate::translate::anthropic_types::{
    ContentBlock, MessagesRequest, MessagesResponse, ResponseContentBlock, StreamEvent,
};
use crate::translate::context::TranslationContext;
use crate::translate::openai_types::ChatCompletionRequest;
use crate::translate::request::{anthropic_to_openai, tool_result_to_string};
use crate::translate::response::openai_to_anthropic;
use crate::translate::streaming::StreamTranslator;
use crate::upstream::{ChunkStream, UpstreamClient};

use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;
use std::time::Instant;

/// Anthropic events for one streamed response, ending in `message_stop` or `error`.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Build the request context, translate the request and log it.
fn prepare(
    req: &MessagesRequest,
    config: &ProxyConfig,
    logger: &SharedLogger,
) -> Result<(TranslationContext, ChatCompletionRequest)> {
    let ctx = TranslationContext::new(req, config);

    logger.request(
        &ctx.requested_model,
        &ctx.upstream_model,
        req.is_streaming(),
        req.messages.len(),
        req.tools.as_ref().map_or(0, Vec::len),
    );

    if let Some(requested) = ctx.clamped_from {
        logger.warn(format!(
            "Capping max_tokens from {} to {}",
            requested, ctx.max_tokens
        ));
    }

    let openai_req = anthropic_to_openai(req, &ctx).map_err(|e| {
        logger.error(format!("Rejected request: {e}"));
        e
    })?;

    // Only requests that passed validation reach the tool-result log
    for msg in &req.messages {
        for block in &msg.content.blocks() {
            if let ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } = block
            {
                logger.tool_result(
                    tool_use_id,
                    &tool_result_to_string(content.as_ref(), *is_error),
                );
            }
        }
    }

    Ok((ctx, openai_req))
}

/// Forward a non-streaming Anthropic request through the configured provider.
pub async fn proxy_non_streaming(
    req: &MessagesRequest,
    config: &ProxyConfig,
    upstream: &UpstreamClient,
    logger: &SharedLogger,
) -> Result<MessagesResponse> {
    let started = Instant::now();
    let (ctx, openai_req) = prepare(req, config, logger)?;

    let result = upstream
        .complete(&openai_req)
        .await
        .and_then(|openai_resp| openai_to_anthropic(&openai_resp, &ctx.requested_model));

    let resp = match result {
        Ok(resp) => resp,
        Err(e) => {
            log_failure(logger, &e);
            return Err(e);
        }
    };

    for block in &resp.content {
        if let ResponseContentBlock::ToolUse { name, input, .. } = block {
            logger.tool_use(name, input);
        }
    }

    logger.response(
        200,
        resp.usage.input_tokens,
        resp.usage.output_tokens,
        elapsed_ms(started),
    );

    Ok(resp)
}

/// Forward a streaming Anthropic request, returning Anthropic stream events.
///
/// Fails before any event is produced if the request is invalid or the provider rejects
/// it; later failures arrive as a terminal `error` event.
pub async fn proxy_streaming(
    req: &MessagesRequest,
    config: &ProxyConfig,
    upstream: &UpstreamClient,
    logger: &SharedLogger,
) -> Result<EventStream> {
    let started = Instant::now();
    let (ctx, openai_req) = prepare(req, config, logger)?;

    let chunks = upstream.stream(&openai_req).await.map_err(|e| {
        log_failure(logger, &e);
        e
    })?;

    Ok(Box::pin(translate_stream(
        chunks,
        ctx.requested_model,
        logger.clone(),
        started,
    )))
}

/// Pull chunks from the provider through a [`StreamTranslator`].
fn translate_stream(
    chunks: ChunkStream,
    model: String,
    logger: SharedLogger,
    started: Instant,
) -> impl Stream<Item = StreamEvent> + Send + 'static {
    async_stream::stream! {
        let mut translator = StreamTranslator::new(&model);
        let mut failed = false;

        tokio::pin!(chunks);

        while let Some(item) = chunks.next().await {
            if let Err(ref e) = item {
                log_failure(&logger, e);
                failed = true;
            }
            for event in translator.step(item) {
                if let StreamEvent::Error { ref error } = event {
                    if !failed {
                        logger.error(format!("Stream aborted: {}", error.message));
                        failed = true;
                    }
                }
                yield event;
            }
            if translator.is_finished() {
                break;
            }
        }

        for event in translator.finish() {
            if let StreamEvent::Error { ref error } = event {
                logger.error(format!("Stream aborted: {}", error.message));
                failed = true;
            }
            yield event;
        }

        for call in translator.completed_tool_calls() {
            logger.tool_use(&call.name, &call.input);
        }

        if !failed {
            let usage = translator.usage();
            logger.response(200, usage.input_tokens, usage.output_tokens, elapsed_ms(started));
        }
    }
}

fn log_failure(logger: &SharedLogger, err: &ProxyError) {
    logger.error(format!(
        "Request failed with status {}: {}",
        err.status_code().as_u16(),
        err
    ));
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
