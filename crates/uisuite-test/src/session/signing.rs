use crate::process::{CommandRunner, CommandSpec};
use crate::{Result, TestError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

static IDENTITY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*\d+\)\s+([0-9A-Fa-f]{40})\s+"([^"]+)""#).expect("valid identity regex")
});

static TEAM_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([A-Z0-9]{10})\)\s*$").expect("valid team id regex"));

static PROFILE_UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<key>UUID</key>\s*<string>([^<]+)</string>").expect("valid uuid regex")
});

/// A code-signing identity usable for on-device testing.
#[derive(Debug, Clone, PartialEq)]
pub struct SigningIdentity {
    pub hash: String,
    pub name: String,
    pub team_id: Option<String>,
    /// UUID of a provisioning profile issued to the same team.
    pub provisioning_profile: Option<String>,
}

impl SigningIdentity {
    /// The certificate kind, e.g. `iPhone Developer`.
    pub fn signing_id(&self) -> &str {
        self.name.split(':').next().unwrap_or(&self.name).trim()
    }
}

/// Parses the output of `security find-identity -v -p codesigning`.
pub fn parse_identities(output: &str) -> Vec<SigningIdentity> {
    output
        .lines()
        .filter_map(|line| {
            let caps = IDENTITY_LINE.captures(line)?;
            let name = caps[2].to_string();
            let team_id = TEAM_ID.captures(&name).map(|c| c[1].to_string());
            Some(SigningIdentity {
                hash: caps[1].to_string(),
                name,
                team_id,
                provisioning_profile: None,
            })
        })
        .collect()
}

pub fn select_identity(identities: Vec<SigningIdentity>, pattern: &str) -> Result<SigningIdentity> {
    let matcher = Regex::new(pattern)
        .map_err(|e| TestError::Config(format!("Invalid identity pattern '{}': {}", pattern, e)))?;
    identities
        .into_iter()
        .find(|identity| matcher.is_match(&identity.name))
        .ok_or_else(|| TestError::NoMatchingIdentity(pattern.to_string()))
}

/// Looks up a matching identity in the keychain, then a provisioning
/// profile for its team. A missing profile is not an error.
pub async fn resolve_identity(
    runner: &dyn CommandRunner,
    pattern: &str,
    profiles_dir: Option<&Path>,
) -> Result<SigningIdentity> {
    let spec = CommandSpec::new("security").args(["find-identity", "-v", "-p", "codesigning"]);
    let output = runner
        .output(&spec)
        .await
        .map_err(|e| TestError::Session(format!("Failed to list signing identities: {}", e)))?;

    let identities = parse_identities(&output.stdout);
    debug!(count = identities.len(), "Found signing identities");

    let mut identity = select_identity(identities, pattern)?;
    info!("Using signing identity '{}'", identity.name);

    if let (Some(dir), Some(team)) = (profiles_dir, identity.team_id.as_deref()) {
        identity.provisioning_profile = find_provisioning_profile(dir, team);
        if identity.provisioning_profile.is_none() {
            warn!("No provisioning profile found for team {}", team);
        }
    }

    Ok(identity)
}

pub fn default_profiles_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join("Library")
            .join("MobileDevice")
            .join("Provisioning Profiles")
    })
}

/// Profiles are CMS envelopes around a plist, so the plist text is searched
/// in place.
pub fn find_provisioning_profile(dir: &Path, team_id: &str) -> Option<String> {
    let pattern = dir.join("*.mobileprovision");
    let entries = glob::glob(&pattern.to_string_lossy()).ok()?;
    let team_entry = format!("<string>{}</string>", team_id);

    for path in entries.flatten() {
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        let text = String::from_utf8_lossy(&bytes);
        if !text.contains(&team_entry) {
            continue;
        }
        if let Some(caps) = PROFILE_UUID.captures(&text) {
            debug!(profile = %path.display(), "Matched provisioning profile");
            return Some(caps[1].to_string());
        }
    }
    None
}
