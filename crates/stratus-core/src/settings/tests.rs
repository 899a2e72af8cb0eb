use super::*;
use crate::model::{DatabaseEngine, RemovalPolicy};
use stratus_config::ConfigLoader;

fn tree(json: serde_json::Value) -> ConfigTree {
    ConfigLoader::new().json("test", json).load().unwrap()
}

fn minimal() -> serde_json::Value {
    serde_json::json!({
        "dns": { "domain_name": "example.com" }
    })
}

fn full() -> serde_json::Value {
    serde_json::json!({
        "stack": { "name": "shop" },
        "dns": { "domain_name": "example.com" },
        "certificate": { "arn": "arn:aws:acm:ap-northeast-1:123:certificate/abc" },
        "database": {
            "name": "shop",
            "instance_class": "t3",
            "instance_size": "micro",
            "allocated_storage_gb": 20,
            "username": "admin",
            "backup": { "window": "01:00-02:00" }
        },
        "services": {
            "web": {
                "image": "nginx:1.27",
                "subdomain": "www",
                "use_database": true,
                "environment": { "MODE": "production" },
                "secrets": { "API_KEY": { "length": 40 } }
            },
            "admin": {
                "image": "admin:latest",
                "subdomain": "admin",
                "desired_count": "2"
            }
        }
    })
}

#[test]
fn test_minimal_defaults() {
    let settings = StackSettings::from_tree(&tree(minimal()), "staging").unwrap();

    assert_eq!(settings.stack_id(), "stratus-staging");
    assert_eq!(settings.timeout_secs, 1800);
    assert_eq!(settings.parallelism, 4);
    assert_eq!(settings.network.cidr, "10.0.0.0/16");
    assert_eq!(
        settings.network.subnet_cidrs,
        vec!["10.0.0.0/24", "10.0.1.0/24"]
    );
    assert_eq!(settings.cluster_name, "stratus-staging-cluster");
    assert!(settings.services.is_empty());
    assert!(settings.database.is_none());
}

#[test]
fn test_missing_domain_name_is_named() {
    let err = StackSettings::from_tree(&tree(serde_json::json!({})), "staging").unwrap_err();
    assert_eq!(err.key(), Some("dns.domain_name"));
}

#[test]
fn test_certificate_required_with_services() {
    let mut json = full();
    json["certificate"] = serde_json::Value::Null;
    let err = StackSettings::from_tree(&tree(json), "staging").unwrap_err();
    assert_eq!(err.key(), Some("certificate.arn"));
}

#[test]
fn test_services_sorted_with_defaults() {
    let settings = StackSettings::from_tree(&tree(full()), "Production").unwrap();

    let names: Vec<_> = settings.services.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["admin", "web"]);

    let admin = &settings.services[0];
    assert_eq!(admin.desired_count, 2);
    assert_eq!(admin.memory_limit_mib, 512);
    assert_eq!(admin.container_port, 80);
    assert!(!admin.use_database);
    assert_eq!(admin.hostname(&settings.domain_name), "admin.example.com");

    let web = &settings.services[1];
    assert_eq!(web.environment.get("MODE").map(String::as_str), Some("production"));
    assert_eq!(web.secrets.len(), 1);
    assert_eq!(web.secrets[0].env_var, "API_KEY");
    assert_eq!(web.secrets[0].node_name, "web-api-key");
    assert_eq!(web.secrets[0].generation.length, 40);
    assert_eq!(web.secrets[0].generation.exclude_characters, "/@\"");
}

#[test]
fn test_database_settings() {
    let settings = StackSettings::from_tree(&tree(full()), "staging").unwrap();
    let db = settings.database.unwrap();

    assert_eq!(db.identifier, "shop-staging-db");
    assert_eq!(db.engine, DatabaseEngine::Mysql);
    assert_eq!(db.engine_version, "8.0.16");
    assert_eq!(db.instance_class, "db.t3.micro");
    assert_eq!(db.port, 3306);
    assert_eq!(db.password.length, 30);
    assert_eq!(db.backup_window.as_deref(), Some("01:00-02:00"));
    assert_eq!(db.backup_retention_days, 7);
    assert_eq!(db.removal_policy, RemovalPolicy::Destroy);
    assert!(db.storage_encrypted);
    assert_eq!(
        db.parameters.get("innodb_file_per_table").map(String::as_str),
        Some("1")
    );
}

#[test]
fn test_database_missing_key_is_named() {
    let mut json = full();
    json["database"]["username"] = serde_json::Value::Null;
    let err = StackSettings::from_tree(&tree(json), "staging").unwrap_err();
    assert_eq!(err.key(), Some("database.username"));
}

#[test]
fn test_disabled_database_with_user_is_rejected() {
    let mut json = full();
    json["database"]["enabled"] = serde_json::Value::Bool(false);
    let err = StackSettings::from_tree(&tree(json), "staging").unwrap_err();
    assert_eq!(err.key(), Some("services.web.use_database"));
}

#[test]
fn test_invalid_service_name() {
    let json = serde_json::json!({
        "dns": { "domain_name": "example.com" },
        "certificate": { "arn": "arn" },
        "services": { "Web_App": { "image": "x", "subdomain": "www" } }
    });
    let err = StackSettings::from_tree(&tree(json), "staging").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}

#[test]
fn test_explicit_subnets() {
    let json = serde_json::json!({
        "dns": { "domain_name": "example.com" },
        "network": { "cidr": "172.16.0.0/20", "subnets": ["172.16.0.0/22", "172.16.4.0/22"] }
    });
    let settings = StackSettings::from_tree(&tree(json), "staging").unwrap();
    assert_eq!(
        settings.network.subnet_cidrs,
        vec!["172.16.0.0/22", "172.16.4.0/22"]
    );
}
