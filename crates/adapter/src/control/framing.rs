// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure classification of control-mode output lines.
//!
//! A control-mode session speaks lines of text. Responses to submitted
//! commands are wrapped in `%begin <time> <n> <flags>` / `%end <time> <n>
//! <flags>` (success) or `%error <time> <n> <flags>` (failure) blocks.
//! Everything else emitted outside such a block is a notification.

/// The classification of a single line read from the control-mode child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Begin { command_number: u64 },
    End { command_number: u64 },
    Error { command_number: u64 },
    Payload(String),
    Notification(String),
}

/// Outcome of a fully consumed command block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockResult {
    pub command_number: u64,
    pub success: bool,
    pub text: String,
}

pub fn classify(line: &str) -> Line {
    if let Some(rest) = line.strip_prefix("%begin ") {
        return match parse_command_number(rest) {
            Some(n) => Line::Begin { command_number: n },
            None => Line::Notification(line.to_owned()),
        };
    }
    if let Some(rest) = line.strip_prefix("%end ") {
        return match parse_command_number(rest) {
            Some(n) => Line::End { command_number: n },
            None => Line::Notification(line.to_owned()),
        };
    }
    if let Some(rest) = line.strip_prefix("%error ") {
        return match parse_command_number(rest) {
            Some(n) => Line::Error { command_number: n },
            None => Line::Notification(line.to_owned()),
        };
    }
    if line.starts_with('%') {
        return Line::Notification(line.to_owned());
    }
    Line::Payload(line.to_owned())
}

/// `<time> <n> <flags>` -> `n`. Fields are whitespace-separated; `<n>` is
/// the second field.
fn parse_command_number(rest: &str) -> Option<u64> {
    rest.split_whitespace().nth(1)?.parse().ok()
}

/// Accumulates payload lines belonging to the currently open block and
/// resolves to a `BlockResult` once an `%end`/`%error` line for the same
/// command number is classified.
#[derive(Debug, Default)]
pub struct BlockAccumulator {
    open: Option<(u64, Vec<String>)>,
}

pub enum Accept {
    /// Line consumed as part of the current block; no block completed yet.
    Pending,
    /// Line completed a block.
    Done(BlockResult),
    /// Line was a notification, unrelated to any block.
    Notification(String),
    /// An `%end`/`%error` for a command number other than the one that is
    /// currently open; the caller should treat this as protocol drift.
    Unexpected { command_number: u64 },
}

impl BlockAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) -> Accept {
        match classify(line) {
            Line::Begin { command_number } => {
                self.open = Some((command_number, Vec::new()));
                Accept::Pending
            }
            Line::Payload(text) => {
                if let Some((_, buf)) = self.open.as_mut() {
                    buf.push(text);
                    Accept::Pending
                } else {
                    Accept::Notification(text)
                }
            }
            Line::End { command_number } => self.close(command_number, true),
            Line::Error { command_number } => self.close(command_number, false),
            Line::Notification(text) => Accept::Notification(text),
        }
    }

    fn close(&mut self, command_number: u64, success: bool) -> Accept {
        match self.open.take() {
            Some((open_number, buf)) if open_number == command_number => {
                Accept::Done(BlockResult {
                    command_number,
                    success,
                    text: buf.join("\n"),
                })
            }
            Some(other) => {
                self.open = Some(other);
                Accept::Unexpected { command_number }
            }
            None => Accept::Unexpected { command_number },
        }
    }
}

#[cfg(test)]
#[path = "framing_tests.rs"]
mod tests;
