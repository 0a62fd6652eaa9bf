//! Note listing parser.
//!
//! The wallet prints notes as loosely formatted text. Blocks start at a `name:` line;
//! the remaining fields are picked out of each block with line-anchored patterns.
//! Blocks lacking a name pair or an asset amount are dropped and counted.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedNote {
    pub first_name: String,
    pub last_name: String,
    pub assets: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_pubkey1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_pubkey2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_coinbase: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_m: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_signers: Option<Vec<String>>,
}

/// Identity used when comparing note snapshots.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NoteKey {
    pub first_name: String,
    pub last_name: String,
    pub assets: u64,
}

impl ParsedNote {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>, assets: u64) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            assets,
            source_pubkey1: None,
            source_pubkey2: None,
            is_coinbase: None,
            lock_m: None,
            lock_signers: None,
        }
    }

    pub fn key(&self) -> NoteKey {
        NoteKey {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            assets: self.assets,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteListing {
    pub notes: Vec<ParsedNote>,
    /// Blocks that started with a `name:` line but could not be parsed.
    pub discarded: usize,
}

impl NoteListing {
    pub fn total_assets(&self) -> u64 {
        self.notes
            .iter()
            .fold(0u64, |acc, note| acc.saturating_add(note.assets))
    }
}

struct Patterns {
    block_start: Regex,
    name: Regex,
    assets: Regex,
    source: Regex,
    coinbase: Regex,
    lock_m: Regex,
    signers: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        block_start: compile(r"(?i)^[\s\-*>#|]*name:"),
        name: compile(r"(?i)^[\s\-*>#|]*name:\s*\[?\s*([^\s\[\],]+)[\s,]+([^\s\[\],]+)\s*\]?"),
        assets: compile(r"(?i)^[\s\-*>#|]*assets:\s*(\S+)"),
        source: compile(
            r"(?i)^[\s\-*>#|]*source:\s*\[?\s*([^\s\[\],]+)(?:[\s,]+([^\s\[\],]+))?",
        ),
        coinbase: compile(r"(?i)^[\s\-*>#|]*coinbase:\s*(true|false|yes|no)\b"),
        lock_m: compile(r"(?i)^[\s\-*>#|]*(?:required signatures|lock m):\s*(\d+)"),
        signers: compile(r"(?i)^[\s\-*>#|]*signers:\s*(.*)$"),
    })
}

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(err) => panic!("invalid built-in note pattern {pattern}: {err}"),
    }
}

/// Parse a wallet note listing.
pub fn parse_notes(output: &str) -> NoteListing {
    let patterns = patterns();
    let mut blocks: Vec<Vec<&str>> = Vec::new();
    for line in output.lines() {
        if patterns.block_start.is_match(line) {
            blocks.push(vec![line]);
        } else if let Some(block) = blocks.last_mut() {
            block.push(line);
        }
    }

    let mut listing = NoteListing::default();
    for block in &blocks {
        match parse_block(patterns, block) {
            Some(note) => listing.notes.push(note),
            None => listing.discarded += 1,
        }
    }
    if listing.discarded > 0 {
        debug!(
            parsed = listing.notes.len(),
            discarded = listing.discarded,
            "dropped incomplete note blocks"
        );
    }
    listing
}

fn parse_block(patterns: &Patterns, block: &[&str]) -> Option<ParsedNote> {
    let captures = patterns.name.captures(block.first()?)?;
    let mut note = ParsedNote::new(&captures[1], &captures[2], 0);
    let mut assets = None;

    for line in &block[1..] {
        if let Some(caps) = patterns.assets.captures(line) {
            assets = parse_amount(&caps[1]);
        } else if let Some(caps) = patterns.source.captures(line) {
            note.source_pubkey1 = Some(caps[1].to_string());
            note.source_pubkey2 = caps.get(2).map(|m| m.as_str().to_string());
        } else if let Some(caps) = patterns.coinbase.captures(line) {
            let flag = caps[1].to_ascii_lowercase();
            note.is_coinbase = Some(flag == "true" || flag == "yes");
        } else if let Some(caps) = patterns.lock_m.captures(line) {
            note.lock_m = caps[1].parse().ok();
        } else if let Some(caps) = patterns.signers.captures(line) {
            let signers: Vec<String> = caps[1]
                .split(|c: char| c.is_whitespace() || matches!(c, ',' | '[' | ']'))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if !signers.is_empty() {
                note.lock_signers = Some(signers);
            }
        }
    }

    note.assets = assets?;
    Some(note)
}

/// Whole amounts only. Thousands separators (`,` `.` `_`) are accepted when one
/// separator splits the number into 3-digit groups; anything else, such as a
/// fractional part, is rejected.
fn parse_amount(raw: &str) -> Option<u64> {
    let digits = match raw.chars().find(|c| !c.is_ascii_digit()) {
        None => raw.to_string(),
        Some(separator @ (',' | '.' | '_')) => {
            let groups: Vec<&str> = raw.split(separator).collect();
            let (head, tail) = groups.split_first()?;
            let all_digits = |group: &str| group.bytes().all(|b| b.is_ascii_digit());
            let grouped = (1..=3).contains(&head.len())
                && all_digits(head)
                && tail.iter().all(|group| group.len() == 3 && all_digits(group));
            if !grouped {
                return None;
            }
            groups.concat()
        }
        Some(_) => return None,
    };
    digits.parse().ok()
}
