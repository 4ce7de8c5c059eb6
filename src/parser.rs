//! Turns `ipatool search` output into application records.
//!
//! ipatool's log format is not stable across releases, so parsing is done in
//! two tiers. Recent versions print a single log line carrying a JSON array
//! (`apps=[...] count=N`), which is decoded directly. Anything else goes
//! through a line-by-line heuristic that looks for bundle identifiers and
//! `Name:`/`Version:` labels. Parsing never fails; at worst nothing is found.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::LazyLock;
use tracing::{debug, warn};

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1B\[[0-9;]*[a-zA-Z]").expect("valid ANSI pattern"));

static STRUCTURED_APPS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"apps=(\[.*?\])\s+count=").expect("valid apps pattern"));

static BUNDLE_ID_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Bundle ID:\s*(\S+)").expect("valid bundle label pattern"));

static BUNDLE_ID_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([a-z0-9.]+\.[a-z0-9.]+)").expect("valid bundle pattern"));

static NAME_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Name:\s*(.+?)(?:\s+Version:|$)").expect("valid name pattern")
});

static VERSION_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Version:\s*(\S+)").expect("valid version pattern"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRecord {
    pub name: String,
    /// May be empty when only a name could be recovered.
    pub bundle_id: String,
    pub version: String,
    pub icon: String,
}

#[derive(Debug, Deserialize)]
struct RawApp {
    #[serde(default)]
    name: String,
    #[serde(rename = "bundleID", default)]
    bundle_id: String,
    #[serde(default)]
    version: String,
}

impl From<RawApp> for ApplicationRecord {
    fn from(raw: RawApp) -> Self {
        Self {
            name: raw.name,
            bundle_id: raw.bundle_id,
            version: raw.version,
            icon: String::new(),
        }
    }
}

pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    let mut out = ANSI_ESCAPE.replace_all(text, "");
    // Removing one sequence can splice the halves of another together
    while ANSI_ESCAPE.is_match(&out) {
        out = Cow::Owned(ANSI_ESCAPE.replace_all(&out, "").into_owned());
    }
    out
}

pub fn parse_search_output(raw: &str) -> Vec<ApplicationRecord> {
    let text = strip_ansi(raw);

    if let Some(apps) = parse_structured(&text) {
        debug!(count = apps.len(), "parsed structured search output");
        return apps;
    }

    let apps = parse_lines(&text);
    debug!(count = apps.len(), "parsed search output line by line");
    apps
}

fn parse_structured(text: &str) -> Option<Vec<ApplicationRecord>> {
    let span = STRUCTURED_APPS.captures(text)?.get(1)?.as_str();

    match serde_json::from_str::<Vec<RawApp>>(span) {
        Ok(apps) => Some(apps.into_iter().map(ApplicationRecord::from).collect()),
        Err(e) => {
            warn!(error = %e, "apps payload is not valid JSON, falling back to line parsing");
            None
        }
    }
}

fn parse_lines(text: &str) -> Vec<ApplicationRecord> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Option<ApplicationRecord> {
    let bundle_id = BUNDLE_ID_LABEL
        .captures(line)
        .or_else(|| BUNDLE_ID_BARE.captures(line))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let name = NAME_LABEL
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string());

    if bundle_id.is_none() && name.is_none() {
        return None;
    }

    let version = VERSION_LABEL
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    Some(ApplicationRecord {
        name: name.unwrap_or_else(|| line.to_string()),
        bundle_id: bundle_id.unwrap_or_default(),
        version,
        icon: String::new(),
    })
}
