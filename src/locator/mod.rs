//! Result Locator -- find the most likely report file under a checked-out repository.
//!
//! This is a cheap structural sniff, not schema validation: anything that looks
//! wrong is skipped so the executor can degrade to the exit-code result.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Directory names never descended into.
pub const SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "bower_components",
    "vendor",
    ".venv",
    "venv",
    "__pycache__",
    ".tox",
];

/// Larger files are not worth reading into memory for a sniff.
const MAX_SNIFF_BYTES: u64 = 64 * 1024 * 1024;

const JUNIT_MARKER: &str = "<testsuite";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatedReport {
    Cucumber(PathBuf),
    Junit(PathBuf),
}

impl LocatedReport {
    pub fn path(&self) -> &Path {
        match self {
            LocatedReport::Cucumber(p) | LocatedReport::Junit(p) => p,
        }
    }
}

/// The preferred report under `root`: Cucumber JSON first, then JUnit XML.
pub fn locate(root: &Path) -> Option<LocatedReport> {
    find_cucumber_json(root)
        .map(LocatedReport::Cucumber)
        .or_else(|| find_junit_xml(root).map(LocatedReport::Junit))
}

/// Every plausible report under `root`, preferred format first.
///
/// Lets a caller fall through to the next file when the first one does not parse.
pub fn candidates(root: &Path) -> Vec<LocatedReport> {
    let (json, xml) = collect_files(root);
    json.into_iter()
        .filter(|p| looks_like_cucumber(p))
        .map(LocatedReport::Cucumber)
        .chain(
            xml.into_iter()
                .filter(|p| looks_like_junit(p))
                .map(LocatedReport::Junit),
        )
        .collect()
}

pub fn find_cucumber_json(root: &Path) -> Option<PathBuf> {
    let (json, _) = collect_files(root);
    json.into_iter().find(|p| looks_like_cucumber(p))
}

pub fn find_junit_xml(root: &Path) -> Option<PathBuf> {
    let (_, xml) = collect_files(root);
    xml.into_iter().find(|p| looks_like_junit(p))
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIPPED_DIRS.contains(&name))
            .unwrap_or(false)
}

/// Walk `root` in file-name order, returning (`.json`, `.xml`) files.
fn collect_files(root: &Path) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut json = Vec::new();
    let mut xml = Vec::new();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let too_big = entry
            .metadata()
            .map(|m| m.len() > MAX_SNIFF_BYTES)
            .unwrap_or(true);
        if too_big {
            continue;
        }

        let path = entry.into_path();
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => json.push(path),
            Some("xml") => xml.push(path),
            _ => {}
        }
    }

    (json, xml)
}

/// Top level is an array whose first element has an `elements` field.
fn looks_like_cucumber(path: &Path) -> bool {
    let Ok(text) = std::fs::read_to_string(path) else {
        return false;
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Array(items)) => items
            .first()
            .and_then(Value::as_object)
            .map(|first| first.contains_key("elements"))
            .unwrap_or(false),
        Ok(_) => false,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "skipping malformed JSON");
            false
        }
    }
}

fn looks_like_junit(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .map(|text| text.contains(JUNIT_MARKER))
        .unwrap_or(false)
}
