//! SW-013: Append-only JSONL execution event log.

use crate::core::types::{ExecutionEvent, TimestampedEvent};
use std::io::Write;
use std::path::Path;

/// Current UTC time as an ISO 8601 timestamp.
pub fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Stamp an event with the current time.
pub fn stamp(event: ExecutionEvent) -> TimestampedEvent {
    TimestampedEvent {
        ts: now_iso8601(),
        event,
    }
}

/// Append one event to the log at `path`, creating parent directories.
pub fn append_event(path: &Path, event: ExecutionEvent) -> Result<(), String> {
    append_events(path, &[stamp(event)])
}

/// Append already-stamped events in order with a single open of the log.
pub fn append_events(path: &Path, events: &[TimestampedEvent]) -> Result<(), String> {
    if events.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create log dir {}: {}", parent.display(), e))?;
        }
    }

    let mut lines = String::new();
    for te in events {
        let json = serde_json::to_string(te).map_err(|e| format!("JSON serialize error: {}", e))?;
        lines.push_str(&json);
        lines.push('\n');
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("cannot open event log {}: {}", path.display(), e))?;

    file.write_all(lines.as_bytes())
        .map_err(|e| format!("write error: {}", e))?;

    Ok(())
}

/// Read every event from the log at `path`, oldest first.
pub fn read_events(path: &Path) -> Result<Vec<TimestampedEvent>, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read event log {}: {}", path.display(), e))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line)
                .map_err(|e| format!("{}:{}: invalid event: {}", path.display(), i + 1, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ExecutionState;

    #[test]
    fn test_sw013_now_iso8601() {
        let ts = now_iso8601();
        assert!(ts.starts_with("20"));
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
        assert_eq!(ts.len(), "2026-01-01T00:00:00Z".len());
    }

    #[test]
    fn test_sw013_append_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/nested/events.jsonl");
        append_event(
            &path,
            ExecutionEvent::ExecutionFailed {
                host: "10.0.0.1".into(),
                plan_id: "p1".into(),
                error: "boom".into(),
            },
        )
        .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"event\":\"execution_failed\""));
        assert!(content.contains("\"ts\":"));
    }

    #[test]
    fn test_sw013_append_then_read_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let states = [
            (ExecutionState::Idle, ExecutionState::Connecting),
            (ExecutionState::Connecting, ExecutionState::KeyStaged),
            (ExecutionState::KeyStaged, ExecutionState::ScriptRunning),
        ];
        for (from, to) in states {
            append_event(&path, ExecutionEvent::StateChanged { host: "h".into(), from, to }).unwrap();
        }

        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2].event,
            ExecutionEvent::StateChanged {
                host: "h".into(),
                from: ExecutionState::KeyStaged,
                to: ExecutionState::ScriptRunning,
            }
        );
    }

    #[test]
    fn test_sw013_batch_keeps_stamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let first = TimestampedEvent {
            ts: "2026-01-01T00:00:00Z".into(),
            event: ExecutionEvent::AttemptFailed {
                host: "h".into(),
                attempt: 1,
                error: "Connection refused".into(),
            },
        };
        let second = stamp(ExecutionEvent::ExecutionFailed {
            host: "h".into(),
            plan_id: "p1".into(),
            error: "gave up".into(),
        });
        append_events(&path, &[first.clone(), second.clone()]).unwrap();
        append_events(&path, &[]).unwrap();

        assert_eq!(read_events(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn test_sw013_read_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, "{\"ts\":\"x\",\"event\":\"nope\"}\n").unwrap();
        let err = read_events(&path).unwrap_err();
        assert!(err.contains(":1:"));
    }
}
