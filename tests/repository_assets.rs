//! ---
//! rp_section: "15-testing-qa-runbook"
//! rp_subsection: "integration-tests"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Checks on shipped configuration, seed data, and source headers."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rp_common::config::AppConfig;
use rp_common::logging::LogFormat;
use rp_store::{load_seed_file, ProvisioningState};

fn repo_path(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join(relative)
}

fn collect_files(dir: &Path, extension: &str, found: &mut Vec<PathBuf>) {
    let entries = fs::read_dir(dir)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", dir.display(), err));
    for entry in entries {
        let path = entry.expect("dir entry").path();
        if path.is_dir() {
            if path.file_name().is_some_and(|name| name == "target") {
                continue;
            }
            collect_files(&path, extension, found);
        } else if path.extension().is_some_and(|ext| ext == extension) {
            found.push(path);
        }
    }
}

#[test]
fn example_config_parses_and_resolves() {
    let config = AppConfig::from_path(&repo_path("configs/rpd.example.toml"))
        .expect("example config is valid");
    let environment = config
        .environment
        .resolve_with(|_| None)
        .expect("example config names its environment");
    assert_eq!(environment.location, "eastus");
    assert_eq!(environment.resource_group, "rp-eastus");
    assert_eq!(config.backend.lease_ttl, Duration::from_secs(60));
    assert!(config.backend.heartbeat_interval < config.backend.lease_ttl);
    assert_eq!(config.logging.format, LogFormat::StructuredJson);
    assert!(config.store.seed_file.is_none());
}

#[test]
fn example_seed_holds_pending_documents() {
    let documents =
        load_seed_file(&repo_path("configs/seed.example.json")).expect("seed file parses");
    assert_eq!(documents.len(), 2);
    assert!(documents
        .iter()
        .all(|doc| !doc.provisioning_state.is_terminal()));
    assert!(documents
        .iter()
        .any(|doc| doc.provisioning_state == ProvisioningState::Deleting));
    assert!(documents.iter().all(|doc| doc.lease_owner.is_none()));
}

#[test]
fn sources_and_manifests_carry_frontmatter() {
    let mut sources = Vec::new();
    let mut manifests = Vec::new();
    for dir in ["crates", "bin", "tests"] {
        collect_files(&repo_path(dir), "rs", &mut sources);
        collect_files(&repo_path(dir), "toml", &mut manifests);
    }
    assert!(!sources.is_empty());
    for path in sources {
        let content = fs::read_to_string(&path).expect("read source");
        assert!(
            content.starts_with("//! ---\n//! rp_section:"),
            "{} must start with the rp frontmatter header",
            path.display()
        );
    }
    for path in manifests {
        let content = fs::read_to_string(&path).expect("read manifest");
        assert!(
            content.starts_with("# ---\n# rp_section:"),
            "{} must start with the rp frontmatter header",
            path.display()
        );
    }
}
