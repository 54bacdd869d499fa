//! Tool-output normalization
//!
//! Recognizes which security tool produced a blob of output (from the command
//! text first, content signatures second) and extracts domain-relevant fields
//! into a structured summary. Strictly best-effort: unrecognized tools and
//! malformed output yield `None`, never an error, and raw output is always
//! preserved upstream regardless of what happens here.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};

// ============================================================================
// LAZY REGEX PATTERNS (compiled once)
// ============================================================================

static NMAP_REPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r"Nmap scan report for (.+)").unwrap());
static NMAP_PORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)/(tcp|udp)\s+(open|closed|filtered)\s+(\S+)").unwrap());
static NMAP_OS: Lazy<Regex> = Lazy::new(|| Regex::new(r"OS details: (.+)").unwrap());

static GOBUSTER_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(/\S+)\s+\(Status:\s+(\d+)\)(?:\s+\[Size:\s+(\d+)\])?").unwrap());

static HTTPX_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+)\]").unwrap());
static HTTPX_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\[\]]*)\]\s*$").unwrap());

static NIKTO_TARGET_IP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\+ Target IP:\s+(.+)").unwrap());
static NIKTO_TARGET_HOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+ Target Hostname:\s+(.+)").unwrap());

static WPSCAN_VULN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[!\] Title: (.+)").unwrap());
static WPSCAN_PLUGIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[i\] Plugin\(s\) Identified: (.+)").unwrap());
static WPSCAN_THEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[i\] Theme\(s\) Identified: (.+)").unwrap());

static SQLMAP_TYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Type: (.+)").unwrap());
static SQLMAP_TECH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)web application technology: (.+)").unwrap());
static SQLMAP_DBMS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)back-end DBMS: (.+)").unwrap());

// ============================================================================
// TOOL IDENTIFICATION
// ============================================================================

/// Tools the registry can extract structured data from.
///
/// Dispatch is a closed enum: unknown identifiers fall through to
/// "no structured output", never a dynamic lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Nmap,
    Subfinder,
    Gobuster,
    Httpx,
    Nikto,
    Wpscan,
    Sqlmap,
}

impl ToolKind {
    const ALL: &'static [ToolKind] = &[
        ToolKind::Nmap,
        ToolKind::Subfinder,
        ToolKind::Gobuster,
        ToolKind::Httpx,
        ToolKind::Nikto,
        ToolKind::Wpscan,
        ToolKind::Sqlmap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Nmap => "nmap",
            ToolKind::Subfinder => "subfinder",
            ToolKind::Gobuster => "gobuster",
            ToolKind::Httpx => "httpx",
            ToolKind::Nikto => "nikto",
            ToolKind::Wpscan => "wpscan",
            ToolKind::Sqlmap => "sqlmap",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured extraction from one tool's output
#[derive(Debug, Clone, Serialize)]
pub struct ParsedOutput {
    pub tool: ToolKind,
    pub summary: String,
    pub data: Value,
}

/// Maps recognized tool output to structured findings.
///
/// Owned by the engine and injected where needed; holds no mutable state, so
/// sharing it is free.
#[derive(Debug, Default, Clone)]
pub struct ParserRegistry;

impl ParserRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Identify the producing tool from the command text, falling back to
    /// content signatures in the output.
    pub fn detect(&self, command: &str, output: &str) -> Option<ToolKind> {
        let command = command.to_lowercase();
        for tool in ToolKind::ALL {
            if command
                .split(|c: char| !c.is_ascii_alphanumeric())
                .any(|token| token == tool.as_str())
            {
                return Some(*tool);
            }
        }

        let output = output.to_lowercase();
        if output.contains("nmap scan report") {
            Some(ToolKind::Nmap)
        } else if output.contains("wpscan") && output.contains("wordpress") {
            Some(ToolKind::Wpscan)
        } else if output.contains("sqlmap") {
            Some(ToolKind::Sqlmap)
        } else if output.contains("nikto") {
            Some(ToolKind::Nikto)
        } else if output.contains("gobuster") {
            Some(ToolKind::Gobuster)
        } else {
            None
        }
    }

    /// Best-effort parse. `None` means "nothing recognized"; it is never an
    /// error condition.
    pub fn parse(&self, command: &str, stdout: &str) -> Option<ParsedOutput> {
        let tool = self.detect(command, stdout)?;
        let data = match tool {
            ToolKind::Nmap => parse_nmap(stdout),
            ToolKind::Subfinder => parse_subfinder(stdout),
            ToolKind::Gobuster => parse_gobuster(stdout),
            ToolKind::Httpx => parse_httpx(stdout),
            ToolKind::Nikto => parse_nikto(stdout),
            ToolKind::Wpscan => parse_wpscan(stdout),
            ToolKind::Sqlmap => parse_sqlmap(stdout),
        };
        let summary = data
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some(ParsedOutput { tool, summary, data })
    }
}

// ============================================================================
// PER-TOOL EXTRACTORS (pure functions)
// ============================================================================

fn parse_nmap(output: &str) -> Value {
    let mut host_info = serde_json::Map::new();
    if let Some(cap) = NMAP_REPORT.captures(output) {
        host_info.insert("target".into(), json!(cap[1].trim()));
    }
    if let Some(cap) = NMAP_OS.captures(output) {
        host_info.insert("os".into(), json!(cap[1].trim()));
    }

    let open_ports: Vec<Value> = NMAP_PORT
        .captures_iter(output)
        .filter(|cap| &cap[3] == "open")
        .filter_map(|cap| {
            let port: u16 = cap[1].parse().ok()?;
            Some(json!({
                "port": port,
                "protocol": &cap[2],
                "state": &cap[3],
                "service": &cap[4],
            }))
        })
        .collect();

    let target = host_info
        .get("target")
        .and_then(Value::as_str)
        .unwrap_or("target")
        .to_string();
    let total_open = open_ports.len();
    json!({
        "host_info": host_info,
        "open_ports": open_ports,
        "total_open": total_open,
        "summary": format!("Found {total_open} open ports on {target}"),
    })
}

fn parse_subfinder(output: &str) -> Value {
    let mut subdomains: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('[') && line.contains('.'))
        .collect();
    subdomains.sort_unstable();
    subdomains.dedup();

    let total = subdomains.len();
    json!({
        "subdomains": subdomains,
        "total": total,
        "summary": format!("Found {total} unique subdomains"),
    })
}

fn parse_gobuster(output: &str) -> Value {
    let mut paths = Vec::new();
    let mut by_status: BTreeMap<u16, usize> = BTreeMap::new();

    for cap in GOBUSTER_PATH.captures_iter(output) {
        let Ok(status) = cap[2].parse::<u16>() else {
            continue;
        };
        *by_status.entry(status).or_default() += 1;
        let mut entry = json!({
            "path": &cap[1],
            "status_code": status,
        });
        if let Some(size) = cap.get(3).and_then(|m| m.as_str().parse::<u64>().ok()) {
            entry["size"] = json!(size);
        }
        paths.push(entry);
    }

    let breakdown = by_status
        .iter()
        .map(|(status, count)| format!("{count} with status {status}"))
        .collect::<Vec<_>>()
        .join(", ");
    let total = paths.len();
    json!({
        "paths": paths,
        "total": total,
        "by_status": by_status
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect::<serde_json::Map<_, _>>(),
        "summary": format!("Found {total} paths ({breakdown})"),
    })
}

fn parse_httpx(output: &str) -> Value {
    let mut alive = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if !line.starts_with("http") {
            continue;
        }
        let url = line.split_whitespace().next().unwrap_or(line);
        let mut entry = json!({ "url": url });
        if let Some(cap) = HTTPX_STATUS.captures(line) {
            if let Ok(status) = cap[1].parse::<u16>() {
                entry["status_code"] = json!(status);
            }
        }
        if let Some(cap) = HTTPX_TITLE.captures(line) {
            let title = cap[1].trim();
            if !title.is_empty() && title.parse::<u32>().is_err() {
                entry["title"] = json!(title);
            }
        }
        alive.push(entry);
    }

    let total = alive.len();
    json!({
        "alive_hosts": alive,
        "total": total,
        "summary": format!("Found {total} alive HTTP services"),
    })
}

fn parse_nikto(output: &str) -> Value {
    let mut target_info = serde_json::Map::new();
    if let Some(cap) = NIKTO_TARGET_IP.captures(output) {
        target_info.insert("ip".into(), json!(cap[1].trim()));
    }
    if let Some(cap) = NIKTO_TARGET_HOST.captures(output) {
        target_info.insert("hostname".into(), json!(cap[1].trim()));
    }

    let findings: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|line| {
            line.starts_with("+ ") && !line.contains("Target") && !line.contains("Start Time")
        })
        .map(|line| line[2..].trim())
        .collect();

    let host = target_info
        .get("hostname")
        .and_then(Value::as_str)
        .unwrap_or("target")
        .to_string();
    let total = findings.len();
    json!({
        "target_info": target_info,
        "findings": findings,
        "total_findings": total,
        "summary": format!("Found {total} potential issues on {host}"),
    })
}

fn parse_wpscan(output: &str) -> Value {
    let vulnerabilities: Vec<&str> = WPSCAN_VULN
        .captures_iter(output)
        .map(|cap| cap.get(1).unwrap().as_str().trim())
        .collect();
    let plugins: Vec<&str> = WPSCAN_PLUGIN
        .captures_iter(output)
        .map(|cap| cap.get(1).unwrap().as_str().trim())
        .collect();
    let themes: Vec<&str> = WPSCAN_THEME
        .captures_iter(output)
        .map(|cap| cap.get(1).unwrap().as_str().trim())
        .collect();

    let summary = format!(
        "Found {} vulnerabilities, {} plugins, {} themes",
        vulnerabilities.len(),
        plugins.len(),
        themes.len()
    );
    let total = vulnerabilities.len();
    json!({
        "vulnerabilities": vulnerabilities,
        "plugins": plugins,
        "themes": themes,
        "total_vulnerabilities": total,
        "summary": summary,
    })
}

fn parse_sqlmap(output: &str) -> Value {
    let mut injection_types: Vec<&str> = Vec::new();
    if output.contains("sqlmap identified the following injection point") {
        injection_types = SQLMAP_TYPE
            .captures_iter(output)
            .map(|cap| cap.get(1).unwrap().as_str().trim())
            .collect();
        injection_types.sort_unstable();
        injection_types.dedup();
    }

    let mut database_info = serde_json::Map::new();
    if let Some(cap) = SQLMAP_TECH.captures(output) {
        database_info.insert("technology".into(), json!(cap[1].trim()));
    }
    if let Some(cap) = SQLMAP_DBMS.captures(output) {
        database_info.insert("dbms".into(), json!(cap[1].trim()));
    }

    let summary = if injection_types.is_empty() {
        "No SQL injections found".to_string()
    } else {
        format!("Found {} SQL injection types", injection_types.len())
    };
    let is_vulnerable = !injection_types.is_empty();
    json!({
        "vulnerabilities": injection_types,
        "database_info": database_info,
        "is_vulnerable": is_vulnerable,
        "summary": summary,
    })
}
