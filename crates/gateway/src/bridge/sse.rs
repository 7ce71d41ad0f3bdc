// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Incremental SSE frame parser.
//!
//! Accumulates `data:` lines; an empty line terminates the event, the lines
//! are joined with `\n` and parsed as JSON. Non-`data:` lines (comments,
//! `event:`, `id:`, ...) are ignored, as are payloads that fail to parse.

use serde_json::Value;

#[derive(Default)]
pub struct SseFramer {
    line_buf: String,
    data_lines: Vec<String>,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the response body; returns any events completed by it.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<Value> {
        let mut events = Vec::new();
        let text = String::from_utf8_lossy(chunk);
        for ch in text.chars() {
            if ch == '\n' {
                let line = std::mem::take(&mut self.line_buf);
                let line = line.strip_suffix('\r').unwrap_or(&line).to_owned();
                if let Some(event) = self.push_line(&line) {
                    events.push(event);
                }
            } else {
                self.line_buf.push(ch);
            }
        }
        events
    }

    fn push_line(&mut self, line: &str) -> Option<Value> {
        if line.is_empty() {
            if self.data_lines.is_empty() {
                return None;
            }
            let payload = std::mem::take(&mut self.data_lines).join("\n");
            return serde_json::from_str(&payload).ok();
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data_lines.push(rest.trim_start().to_owned());
        }
        None
    }
}

#[cfg(test)]
#[path = "sse_tests.rs"]
mod tests;
