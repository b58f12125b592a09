//! Host platform facts for the `platform` template function

use serde::Serialize;
use std::process::Command;
use std::sync::OnceLock;

/// The host the engine runs on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Platform {
    #[serde(rename = "OS")]
    pub os: String,
    #[serde(rename = "Arch")]
    pub arch: String,
    #[serde(rename = "Distribution")]
    pub distribution: String,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Build")]
    pub build: String,
}

/// Detected once per process
pub fn current() -> &'static Platform {
    static PLATFORM: OnceLock<Platform> = OnceLock::new();
    PLATFORM.get_or_init(detect)
}

fn detect() -> Platform {
    let mut platform = Platform {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        ..Platform::default()
    };

    match std::env::consts::OS {
        "linux" => {
            if let Ok(text) = std::fs::read_to_string("/etc/os-release") {
                let (id, version) = parse_os_release(&text);
                platform.distribution = id;
                platform.version = version;
            }
            if let Ok(release) = std::fs::read_to_string("/proc/sys/kernel/osrelease") {
                platform.build = release.trim().to_string();
            }
        }
        "macos" => {
            platform.distribution = "macos".to_string();
            platform.version = command_output("sw_vers", &["-productVersion"]);
            platform.build = command_output("sw_vers", &["-buildVersion"]);
        }
        _ => {}
    }
    platform
}

fn command_output(program: &str, args: &[&str]) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .unwrap_or_default()
}

/// `ID` and `VERSION_ID` from an os-release file
fn parse_os_release(text: &str) -> (String, String) {
    let mut id = String::new();
    let mut version = String::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
        match key.trim() {
            "ID" => id = value,
            "VERSION_ID" => version = value,
            _ => {}
        }
    }
    (id, version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_os_release() {
        let text = "NAME=\"Ubuntu\"\nID=ubuntu\nVERSION_ID=\"24.04\"\n# comment\n";
        assert_eq!(
            parse_os_release(text),
            ("ubuntu".to_string(), "24.04".to_string())
        );
    }

    #[test]
    fn test_current_matches_build_target() {
        let platform = current();
        assert_eq!(platform.os, std::env::consts::OS);
        assert_eq!(platform.arch, std::env::consts::ARCH);
    }

    #[test]
    fn test_serialized_keys() {
        let value = serde_json::to_value(current()).unwrap();
        for key in ["OS", "Arch", "Distribution", "Version", "Build"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }
}
