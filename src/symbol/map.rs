// Fri Jan 16 2026 - Alex

use crate::symbol::SymbolError;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::path::Path;

static MAP_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:0[xX])?([0-9A-Fa-f]+)\s+(\S+)\s*$").expect("valid symbol map regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub name: String,
    pub address: u64,
}

/// Parses either a JSON object of `name -> address` or `ADDRESS NAME` lines.
pub fn parse_symbol_map(text: &str) -> Result<Vec<MapEntry>, SymbolError> {
    if text.trim_start().starts_with('{') {
        parse_json_map(text)
    } else {
        parse_text_map(text)
    }
}

pub fn load_symbol_map<P: AsRef<Path>>(path: P) -> Result<Vec<MapEntry>, SymbolError> {
    let text = std::fs::read_to_string(path)?;
    parse_symbol_map(&text)
}

fn parse_json_map(text: &str) -> Result<Vec<MapEntry>, SymbolError> {
    let object: IndexMap<String, Value> =
        serde_json::from_str(text).map_err(|e| SymbolError::ParseError(e.to_string()))?;

    object
        .into_iter()
        .map(|(name, value)| {
            let address = match &value {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => parse_address(s),
                _ => None,
            }
            .ok_or_else(|| SymbolError::ParseError(format!("bad address for {}: {}", name, value)))?;
            Ok(MapEntry { name, address })
        })
        .collect()
}

fn parse_text_map(text: &str) -> Result<Vec<MapEntry>, SymbolError> {
    let mut entries = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        let caps = MAP_LINE.captures(line).ok_or_else(|| SymbolError::InvalidMapLine {
            line: idx + 1,
            reason: "expected `ADDRESS NAME`".to_string(),
        })?;

        let address = u64::from_str_radix(&caps[1], 16).map_err(|e| SymbolError::InvalidMapLine {
            line: idx + 1,
            reason: e.to_string(),
        })?;

        entries.push(MapEntry {
            name: caps[2].to_string(),
            address,
        });
    }

    Ok(entries)
}

fn parse_address(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}
