use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::translate::usage::UsageRecord;
use crate::translate::{InboundKind, RelayInfo, RequestMeta};

pub const MAX_LOG_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Which part of the gateway wrote it: `relay`, `tools`, `usage`, `webhook`, ...
    pub component: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl RelayLogEntry {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.into(),
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, ctx: serde_json::Value) -> Self {
        self.context = Some(ctx);
        self
    }
}

/// Last `MAX_LOG_ENTRIES` entries in memory, every entry appended to a JSONL file.
struct RelayLogBook {
    entries: VecDeque<RelayLogEntry>,
    file_path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl RelayLogBook {
    fn open(file_path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut entries = VecDeque::with_capacity(MAX_LOG_ENTRIES);
        if file_path.exists() {
            let reader = BufReader::new(File::open(file_path)?);
            for line in reader.lines().map_while(|l| l.ok()) {
                if let Ok(entry) = serde_json::from_str::<RelayLogEntry>(&line) {
                    if entries.len() >= MAX_LOG_ENTRIES {
                        entries.pop_front();
                    }
                    entries.push_back(entry);
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(file_path)?;
        Ok(Self {
            entries,
            file_path: file_path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
        })
    }

    fn append(&mut self, entry: RelayLogEntry) {
        if let Some(ref mut writer) = self.writer {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(writer, "{}", line);
                let _ = writer.flush();
            }
        }
        if self.entries.len() >= MAX_LOG_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    fn recent(&self, limit: usize) -> Vec<RelayLogEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    /// Rewrite the file so it holds only what is still in the ring.
    fn compact(&mut self) -> std::io::Result<()> {
        self.writer = None;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.file_path)?;
        let mut writer = BufWriter::new(file);
        for entry in &self.entries {
            if let Ok(line) = serde_json::to_string(entry) {
                writeln!(writer, "{}", line)?;
            }
        }
        writer.flush()?;
        let file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }
}

/// Shared handle to the relay log.
#[derive(Clone)]
pub struct RelayLog(Arc<Mutex<RelayLogBook>>);

impl std::fmt::Debug for RelayLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let book = self.0.lock();
        f.debug_struct("RelayLog")
            .field("file", &book.file_path)
            .field("entries", &book.entries.len())
            .finish()
    }
}

impl RelayLog {
    pub fn open(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(RelayLogBook::open(file_path.as_ref())?))))
    }

    pub fn log(&self, entry: RelayLogEntry) {
        self.0.lock().append(entry);
    }

    pub fn info(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(RelayLogEntry::new(LogLevel::Info, component, message));
    }

    pub fn warn(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(RelayLogEntry::new(LogLevel::Warn, component, message));
    }

    pub fn error(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(RelayLogEntry::new(LogLevel::Error, component, message));
    }

    pub fn log_with_context(
        &self,
        level: LogLevel,
        component: impl Into<String>,
        message: impl Into<String>,
        context: serde_json::Value,
    ) {
        self.log(RelayLogEntry::new(level, component, message).with_context(context));
    }

    /// One entry per relayed request, plus one per compat adjustment and one
    /// summarizing tool normalization when anything was touched.
    pub fn record_relay(&self, info: &RelayInfo, caller: InboundKind, meta: &RequestMeta) {
        self.log_with_context(
            LogLevel::Info,
            "relay",
            format!("{} -> {} ({})", info.origin_model, info.upstream_model, info.mode),
            json!({
                "origin_model": info.origin_model,
                "upstream_model": info.upstream_model,
                "mode": info.mode,
                "region": info.region,
                "caller_format": caller,
                "stream": info.is_stream,
            }),
        );
        for adjustment in &meta.adjustments {
            self.info("compat", adjustment.clone());
        }
        if !meta.tool_actions.is_empty() {
            self.log_with_context(
                LogLevel::Info,
                "tools",
                format!("{} tool(s) normalized", meta.tool_actions.len()),
                json!({ "actions": meta.tool_actions }),
            );
        }
    }

    pub fn record_usage(&self, model: &str, usage: &UsageRecord) {
        self.log_with_context(
            LogLevel::Info,
            "usage",
            format!("{} used {} units", model, usage.total_units()),
            json!({ "model": model, "usage": usage }),
        );
    }

    pub fn recent(&self, limit: usize) -> Vec<RelayLogEntry> {
        self.0.lock().recent(limit)
    }

    pub fn compact(&self) -> std::io::Result<()> {
        self.0.lock().compact()
    }
}
