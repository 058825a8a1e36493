//! ---
//! rp_section: "01-core-functionality"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Build metadata used for version stamping."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use serde::Serialize;

const UNKNOWN: &str = "UNKNOWN";

/// Compile-time version metadata captured via `vergen`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VersionInfo {
    /// Workspace semantic version.
    pub semver: String,
    /// Git commit hash captured at build time.
    pub git_sha: String,
    /// Target triple used for the build.
    pub target: String,
    /// Cargo profile used during compilation.
    pub profile: String,
}

impl VersionInfo {
    /// Construct a new [`VersionInfo`] instance using environment metadata.
    #[must_use]
    pub fn current() -> Self {
        Self {
            semver: env!("CARGO_PKG_VERSION").to_owned(),
            git_sha: option_env!("VERGEN_GIT_SHA").unwrap_or(UNKNOWN).to_owned(),
            target: option_env!("VERGEN_CARGO_TARGET_TRIPLE")
                .unwrap_or(UNKNOWN)
                .to_owned(),
            profile: option_env!("VERGEN_CARGO_DEBUG")
                .map(|debug| if debug == "true" { "debug" } else { "release" })
                .unwrap_or(UNKNOWN)
                .to_owned(),
        }
    }

    /// Value written into a document's `provisioned_by` field.
    ///
    /// The git commit identifies the build; the semantic version stands in when
    /// the commit was not captured.
    #[must_use]
    pub fn stamp(&self) -> String {
        if self.git_sha.is_empty() || self.git_sha == UNKNOWN || self.git_sha.starts_with("VERGEN") {
            self.semver.clone()
        } else {
            self.git_sha.clone()
        }
    }

    /// Returns a concise CLI string combining semantic version and git hash.
    #[must_use]
    pub fn cli_string(&self) -> String {
        format!("{} ({})", self.semver, self.git_sha)
    }

    /// Extended string containing build metadata suitable for `--version` flags.
    #[must_use]
    pub fn extended(&self) -> String {
        format!(
            "rpd v{semver} (git {sha})\nTarget: {target}\nProfile: {profile}",
            semver = self.semver,
            sha = self.git_sha,
            target = self.target,
            profile = self.profile
        )
    }
}

/// Build stamp of the running binary.
#[must_use]
pub fn build_stamp() -> String {
    VersionInfo::current().stamp()
}
