//! Resolve the traced process and its executable from CLI input.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::Pid;

/// Result of process lookup.
#[derive(Debug)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub exe_path: PathBuf,
    pub command: String,
}

/// How well a process matched the search pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Match {
    Substring,
    Exact,
}

/// Find a process by name.
///
/// Searches `/proc` for processes whose command name (`/proc/<pid>/stat`) or
/// executable basename (`/proc/<pid>/exe`) matches. Exact matches win over
/// substring matches; xgotop itself is never a candidate.
///
/// # Errors
/// - No processes found
/// - Multiple equally good matches (ambiguous)
pub fn find_process_by_name(name: &str) -> Result<ProcessInfo> {
    let own_pid = i32::try_from(std::process::id()).unwrap_or(-1);
    let mut exact = Vec::new();
    let mut partial = Vec::new();

    let proc_dir = fs::read_dir("/proc").context("Failed to read /proc")?;

    for entry in proc_dir.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() else {
            continue;
        };
        if pid == own_pid {
            continue;
        }

        // Skip kernel threads and inaccessible processes
        let Ok(exe_path) = fs::read_link(format!("/proc/{pid}/exe")) else {
            continue;
        };
        let Ok(stat_content) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
            continue;
        };
        let Ok(command) = extract_comm(&stat_content) else {
            continue;
        };

        let info = ProcessInfo { pid: Pid(pid), exe_path, command };
        match match_quality(&info.command, &info.exe_path, name) {
            Some(Match::Exact) => exact.push(info),
            Some(Match::Substring) => partial.push(info),
            None => {}
        }
    }

    let mut matches = if exact.is_empty() { partial } else { exact };
    match matches.len() {
        0 => bail!(
            "No process matching '{name}' found.\n\
             Check running processes with: ps aux | grep {name}"
        ),
        1 => Ok(matches.remove(0)),
        _ => {
            let list: Vec<String> =
                matches.iter().map(|m| format!("  {} ({})", m.pid.0, m.command)).collect();
            bail!(
                "Multiple processes match '{name}':\n{}\n\n\
                 Specify PID explicitly: xgotop --pid <PID>",
                list.join("\n")
            )
        }
    }
}

/// Resolve binary path from PID via `/proc/<pid>/exe`.
///
/// # Errors
/// Returns error if the process doesn't exist or `/proc/<pid>/exe` is not readable.
pub fn resolve_exe_path(pid: Pid) -> Result<PathBuf> {
    let exe_link = format!("/proc/{}/exe", pid.0);
    fs::read_link(&exe_link).with_context(|| format!("Cannot read {exe_link}"))
}

/// Extract command name from `/proc/<pid>/stat`.
/// Format: "pid (comm) state ..."
fn extract_comm(stat_line: &str) -> Result<String> {
    let open = stat_line.find('(').context("Invalid stat format")?;
    let close = stat_line.rfind(')').context("Invalid stat format")?;
    if open >= close {
        bail!("Invalid stat format");
    }
    Ok(stat_line[open + 1..close].to_string())
}

fn match_quality(command: &str, exe_path: &Path, pattern: &str) -> Option<Match> {
    let exe_basename = exe_path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let pattern_basename =
        Path::new(pattern).file_name().and_then(|n| n.to_str()).unwrap_or(pattern);

    if command == pattern_basename || exe_basename == pattern_basename {
        Some(Match::Exact)
    } else if command.contains(pattern) || exe_basename.contains(pattern) {
        Some(Match::Substring)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_comm() {
        let stat = "1234 (my-app) S 1 1234 1234 0 -1 4194304";
        assert_eq!(extract_comm(stat).unwrap(), "my-app");
    }

    #[test]
    fn test_extract_comm_with_parens() {
        // Command names can contain parentheses
        let stat = "1234 (app (v2)) S 1 1234";
        assert_eq!(extract_comm(stat).unwrap(), "app (v2)");
    }

    #[test]
    fn test_extract_comm_rejects_garbage() {
        assert!(extract_comm("1234 ) S (").is_err());
    }

    #[test]
    fn test_match_quality() {
        let exe = Path::new("/usr/bin/api-server");
        assert_eq!(match_quality("api-server", exe, "api-server"), Some(Match::Exact));
        assert_eq!(match_quality("api-server", exe, "./bin/api-server"), Some(Match::Exact));
        assert_eq!(match_quality("api-server", exe, "server"), Some(Match::Substring));
        assert_eq!(match_quality("api-server", exe, "worker"), None);
    }

    #[test]
    fn test_unknown_name() {
        let err = find_process_by_name("xgotop-no-such-process-7f3a").unwrap_err();
        assert!(err.to_string().contains("No process matching"));
    }
}
