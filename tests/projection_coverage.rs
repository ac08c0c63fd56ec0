//! Projection Coverage Tests
//!
//! - resolve_projections returns exactly the covering projections, in order
//! - translation is invertible inside a projection's region
//! - exceptions carve regions out of a rule
//! - descriptors load from JSON files

use std::fs;

use aerofed::federation::{FederatedRepositoryConfig, Projection, RepositoryDescriptor};
use aerofed::graph::Path;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn p(text: &str) -> Path {
    Path::parse(text).unwrap()
}

fn projection(source: &str, rules: &[&str]) -> Projection {
    Projection::parse(source, rules).unwrap()
}

fn config() -> FederatedRepositoryConfig {
    FederatedRepositoryConfig::new(
        "fed",
        projection("cache", &["/ => /"]),
        vec![
            projection("a", &["/data/a => /"]),
            projection("b", &["/data/b => /root", "/shared => /shared"]),
            projection("c", &["/shared => /", "/legacy => /old $ tmp"]),
        ],
    )
    .unwrap()
}

fn covering(config: &FederatedRepositoryConfig, path: &str) -> Vec<String> {
    config
        .resolve_projections(&p(path))
        .into_iter()
        .map(|projection| projection.source_name().to_string())
        .collect()
}

// =============================================================================
// Coverage
// =============================================================================

#[test]
fn test_single_projection_covers_its_region() {
    let config = config();
    assert_eq!(covering(&config, "/data/a"), vec!["a"]);
    assert_eq!(covering(&config, "/data/a/x/y[2]"), vec!["a"]);
    assert_eq!(covering(&config, "/data/b/x"), vec!["b"]);
}

#[test]
fn test_overlapping_projections_in_declaration_order() {
    let config = config();
    assert_eq!(covering(&config, "/shared"), vec!["b", "c"]);
    assert_eq!(covering(&config, "/shared/doc"), vec!["b", "c"]);
}

#[test]
fn test_uncovered_paths_resolve_to_nothing() {
    let config = config();
    assert!(covering(&config, "/").is_empty());
    assert!(covering(&config, "/data").is_empty());
    assert!(covering(&config, "/elsewhere").is_empty());
}

#[test]
fn test_exception_removes_coverage() {
    let config = config();
    assert_eq!(covering(&config, "/legacy/page"), vec!["c"]);
    assert!(covering(&config, "/legacy/tmp").is_empty());
    assert!(covering(&config, "/legacy/tmp/scratch").is_empty());
}

// =============================================================================
// Translation
// =============================================================================

#[test]
fn test_translation_round_trip() {
    let config = config();
    let source_paths = ["/", "/x", "/x/y[3]", "/old", "/old/page/sub"];

    for projection in config.source_projections() {
        for text in source_paths {
            let source_path = p(text);
            for federated in projection.paths_in_repository(&source_path) {
                assert!(
                    projection.paths_in_source(&federated).contains(&source_path),
                    "{} did not map back to {} through {}",
                    federated,
                    source_path,
                    projection
                );
            }
        }
    }
}

#[test]
fn test_translation_rewrites_prefix() {
    let b = projection("b", &["/data/b => /root"]);
    assert_eq!(b.paths_in_source(&p("/data/b/doc[2]")), vec![p("/root/doc[2]")]);
    assert_eq!(b.paths_in_repository(&p("/root/doc")), vec![p("/data/b/doc")]);
    assert!(b.paths_in_repository(&p("/other")).is_empty());
}

#[test]
fn test_excluded_source_paths_do_not_translate() {
    let c = projection("c", &["/legacy => /old $ tmp"]);
    assert!(c.paths_in_repository(&p("/old/tmp/x")).is_empty());
    assert_eq!(c.paths_in_repository(&p("/old/keep")), vec![p("/legacy/keep")]);
}

#[test]
fn test_malformed_rule_is_rejected() {
    assert!(Projection::parse("a", &["/data/a"]).is_err());
    assert!(Projection::parse("a", &["data => /"]).is_err());
    assert!(Projection::parse("a", &["/data => / $"]).is_err());
}

// =============================================================================
// Descriptor Files
// =============================================================================

#[test]
fn test_descriptor_loads_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("aerofed.json");
    fs::write(
        &path,
        r#"{
            "name": "fed",
            "cache": {"source": "cache", "rules": ["/ => /"]},
            "sources": [
                {"source": "a", "rules": ["/data/a => /"], "locking": {"strategy": "workspace"}},
                {"source": "b", "workspace": "live", "read_only": true, "rules": ["/data/b => /"]}
            ],
            "default_cache_policy": {"ttl_ms": 60000}
        }"#,
    )
    .unwrap();

    let descriptor = RepositoryDescriptor::load(&path).unwrap();
    let config = FederatedRepositoryConfig::from_descriptor(&descriptor).unwrap();

    assert_eq!(config.name(), "fed");
    assert_eq!(config.source_names(), vec!["a", "b"]);
    assert_eq!(config.source_lock_settings("a").unwrap().strategy, "workspace");
    assert!(config.source_lock_settings("b").is_none());
    assert!(config.default_cache_policy().is_some());

    let b = &config.source_projections()[1];
    assert!(b.is_read_only());
    assert_eq!(b.workspace(), Some("live"));
    assert!(!config.problems().has_errors());
}

#[test]
fn test_unparseable_rule_is_reported_as_problem() {
    let descriptor = RepositoryDescriptor::from_json(
        r#"{
            "name": "fed",
            "cache": {"source": "cache", "rules": ["/ => /"]},
            "sources": [
                {"source": "a", "rules": ["/data/a => /"]},
                {"source": "b", "rules": ["not a rule"]}
            ]
        }"#,
    )
    .unwrap();

    let config = FederatedRepositoryConfig::from_descriptor(&descriptor).unwrap();
    assert_eq!(config.source_names(), vec!["a"]);
    assert!(config.problems().has_errors());
}

#[test]
fn test_descriptor_without_sources_is_unusable() {
    let descriptor = RepositoryDescriptor::from_json(
        r#"{"name": "fed", "cache": {"source": "cache", "rules": ["/ => /"]}}"#,
    )
    .unwrap();
    assert!(FederatedRepositoryConfig::from_descriptor(&descriptor).is_err());
}
