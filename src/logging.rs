use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

const MAX_LOG_ENTRIES: usize = 10_000;
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One observable step in the life of a proxied request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProxyEvent {
    Request {
        requested_model: String,
        upstream_model: String,
        streaming: bool,
        messages: usize,
        tools: usize,
    },
    Response {
        status: u16,
        input_tokens: u64,
        output_tokens: u64,
        duration_ms: u64,
    },
    ToolUse {
        name: String,
        input: String,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    Warning {
        message: String,
    },
    Error {
        message: String,
    },
}

impl ProxyEvent {
    pub fn level(&self) -> LogLevel {
        match self {
            Self::Request { .. } | Self::Response { .. } => LogLevel::Info,
            Self::ToolUse { .. } | Self::ToolResult { .. } => LogLevel::Debug,
            Self::Warning { .. } => LogLevel::Warn,
            Self::Error { .. } => LogLevel::Error,
        }
    }

    fn trace(&self) {
        match self {
            Self::Request {
                requested_model,
                upstream_model,
                streaming,
                messages,
                tools,
            } => tracing::info!(
                requested_model = %requested_model,
                upstream_model = %upstream_model,
                streaming,
                messages,
                tools,
                "Request"
            ),
            Self::Response {
                status,
                input_tokens,
                output_tokens,
                duration_ms,
            } => tracing::info!(status, input_tokens, output_tokens, duration_ms, "Response"),
            Self::ToolUse { name, input } => tracing::debug!(tool = %name, input = %input, "Tool use"),
            Self::ToolResult {
                tool_use_id,
                content,
            } => tracing::debug!(tool_use_id = %tool_use_id, content = %content, "Tool result"),
            Self::Warning { message } => tracing::warn!("{message}"),
            Self::Error { message } => tracing::error!("{message}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(flatten)]
    pub event: ProxyEvent,
}

impl LogEntry {
    pub fn new(event: ProxyEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            level: event.level(),
            event,
        }
    }
}

/// Ring buffer of recent events, optionally persisted as JSONL.
pub struct Logger {
    entries: VecDeque<LogEntry>,
    writer: Option<BufWriter<File>>,
}

impl Logger {
    pub fn in_memory() -> Self {
        Self {
            entries: VecDeque::with_capacity(MAX_LOG_ENTRIES),
            writer: None,
        }
    }

    /// Open (or create) a JSONL file, replaying its tail into the buffer.
    pub fn with_file(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref();

        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut logger = Self::in_memory();

        if file_path.exists() {
            let reader = BufReader::new(File::open(file_path)?);
            for line in reader.lines().map_while(std::result::Result::ok) {
                if let Ok(entry) = serde_json::from_str::<LogEntry>(&line) {
                    logger.push(entry);
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        logger.writer = Some(BufWriter::new(file));

        Ok(logger)
    }

    fn push(&mut self, entry: LogEntry) {
        if self.entries.len() >= MAX_LOG_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn log(&mut self, entry: LogEntry) {
        if let Some(ref mut writer) = self.writer {
            if let Ok(json) = serde_json::to_string(&entry) {
                let _ = writeln!(writer, "{}", json);
                let _ = writer.flush();
            }
        }
        self.push(entry);
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cloneable handle shared by all request handlers.
#[derive(Clone)]
pub struct SharedLogger(Arc<Mutex<Logger>>);

impl SharedLogger {
    pub fn in_memory() -> Self {
        Self(Arc::new(Mutex::new(Logger::in_memory())))
    }

    pub fn new(file_path: Option<&Path>) -> std::io::Result<Self> {
        let logger = match file_path {
            Some(path) => Logger::with_file(path)?,
            None => Logger::in_memory(),
        };
        Ok(Self(Arc::new(Mutex::new(logger))))
    }

    pub fn record(&self, event: ProxyEvent) {
        event.trace();
        if let Ok(mut logger) = self.0.lock() {
            logger.log(LogEntry::new(event));
        }
    }

    pub fn request(
        &self,
        requested_model: &str,
        upstream_model: &str,
        streaming: bool,
        messages: usize,
        tools: usize,
    ) {
        self.record(ProxyEvent::Request {
            requested_model: requested_model.to_string(),
            upstream_model: upstream_model.to_string(),
            streaming,
            messages,
            tools,
        });
    }

    pub fn response(&self, status: u16, input_tokens: u64, output_tokens: u64, duration_ms: u64) {
        self.record(ProxyEvent::Response {
            status,
            input_tokens,
            output_tokens,
            duration_ms,
        });
    }

    pub fn tool_use(&self, name: &str, input: &serde_json::Value) {
        self.record(ProxyEvent::ToolUse {
            name: name.to_string(),
            input: preview(&input.to_string()),
        });
    }

    pub fn tool_result(&self, tool_use_id: &str, content: &str) {
        self.record(ProxyEvent::ToolResult {
            tool_use_id: preview(tool_use_id),
            content: preview(content),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.record(ProxyEvent::Warning {
            message: message.into(),
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(ProxyEvent::Error {
            message: message.into(),
        });
    }

    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.0.lock().map(|l| l.recent(limit)).unwrap_or_default()
    }
}

fn preview(s: &str) -> String {
    let cut = crate::error::truncate(s, PREVIEW_CHARS);
    if cut.len() < s.len() {
        format!("{cut}...")
    } else {
        cut.to_string()
    }
}
