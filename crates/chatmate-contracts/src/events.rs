use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only writer for a run's `events.jsonl`.
///
/// Every emitted event carries `type`, `run_id`, and `ts` defaults; the
/// caller payload is merged last and may override them. One compact JSON
/// object per line. Handles are cheap to clone and safe to share.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    run_id: String,
    append: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                path: path.into(),
                run_id: run_id.into(),
                append: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn run_id(&self) -> &str {
        &self.shared.run_id
    }

    pub fn emit(&self, kind: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(kind.to_string()));
        event.insert(
            "run_id".to_string(),
            Value::String(self.shared.run_id.clone()),
        );
        event.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        for (key, value) in payload {
            event.insert(key, value);
        }

        if let Some(parent) = self.shared.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(&event)?;

        let _guard = self
            .shared
            .append
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.shared.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::{json, Value};

    use super::{EventPayload, EventWriter};

    #[test]
    fn emits_one_compact_line_with_defaults() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "review-42");

        let mut payload = EventPayload::new();
        payload.insert("messages".to_string(), json!(4));
        let emitted = writer.emit("render_started", payload)?;

        let content = fs::read_to_string(&path)?;
        let parsed: Value = serde_json::from_str(content.lines().next().unwrap_or(""))?;
        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], json!("render_started"));
        assert_eq!(parsed["run_id"], json!("review-42"));
        assert_eq!(parsed["messages"], json!(4));
        DateTime::parse_from_rfc3339(parsed["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn payload_overrides_default_fields() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "review-42");

        let mut payload = EventPayload::new();
        payload.insert("run_id".to_string(), json!("other-run"));
        let emitted = writer.emit("render_started", payload)?;
        assert_eq!(emitted["run_id"], json!("other-run"));
        Ok(())
    }

    #[test]
    fn appends_across_emits() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "review-42");

        writer.emit("render_started", EventPayload::new())?;
        writer.emit("render_finished", EventPayload::new())?;

        let content = fs::read_to_string(&path)?;
        let kinds: Vec<String> = content
            .lines()
            .map(|line| {
                serde_json::from_str::<Value>(line)
                    .ok()
                    .and_then(|event| event["type"].as_str().map(str::to_string))
                    .unwrap_or_default()
            })
            .collect();
        assert_eq!(kinds, vec!["render_started", "render_finished"]);
        Ok(())
    }
}
