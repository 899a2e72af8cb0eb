//! モデル定義
//!
//! リソースグラフを構成するノードと、種別ごとの型付きプロパティを定義します。
//! 各リソース種別はモジュールに分離されています。

mod database;
mod dns;
mod kind;
mod network;
mod node;
mod reference;
mod secret;
mod service;

// Re-exports
pub use database::*;
pub use dns::*;
pub use kind::*;
pub use network::*;
pub use node::*;
pub use reference::*;
pub use secret::*;
pub use service::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn service_spec() -> ServiceSpec {
        let mut environment = BTreeMap::new();
        environment.insert(
            "MYSQL_HOST".to_string(),
            Interpolated::reference(Reference::new("database", outputs::ENDPOINT_ADDRESS))
                .push_text(":")
                .push_ref(Reference::new("database", outputs::ENDPOINT_PORT)),
        );
        environment.insert("MODE".to_string(), Interpolated::literal("production"));

        let mut secrets = BTreeMap::new();
        secrets.insert(
            "MYSQL_PASSWORD".to_string(),
            Reference::new("database-password", outputs::SECRET),
        );

        ServiceSpec {
            service_name: "web".to_string(),
            container_name: "web".to_string(),
            image: "nginx:1.27".to_string(),
            desired_count: 2,
            memory_limit_mib: 512,
            container_port: 80,
            hostname: "web.example.com".to_string(),
            cluster: Reference::new("cluster", outputs::ARN),
            subnets: Reference::new("network", outputs::SUBNET_IDS),
            target_group: Reference::new("web-lb", outputs::TARGET_GROUP_ARN),
            environment,
            secrets,
        }
    }

    #[test]
    fn test_node_dependencies_from_references() {
        let node = ResourceNode::new("web", ResourceSpec::Service(service_spec()));

        let deps: Vec<_> = node.depends_on.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            deps,
            vec!["cluster", "database", "database-password", "network", "web-lb"]
        );
        assert_eq!(node.kind(), ResourceKind::Service);
    }

    #[test]
    fn test_interpolated_display_and_resolve() {
        let value = Interpolated::reference(Reference::new("database", "endpoint_address"))
            .push_text(":")
            .push_ref(Reference::new("database", "endpoint_port"));

        assert_eq!(
            value.to_string(),
            "${database.endpoint_address}:${database.endpoint_port}"
        );

        let resolved: Result<String, ()> = value.resolve(|r| {
            Ok(match r.output.as_str() {
                "endpoint_address" => "db.internal".to_string(),
                _ => "3306".to_string(),
            })
        });
        assert_eq!(resolved.unwrap(), "db.internal:3306");
    }

    #[test]
    fn test_spec_serialization_is_tagged() {
        let spec = ResourceSpec::DnsZone(DnsZoneSpec {
            domain_name: "example.com".to_string(),
        });

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["kind"], "dns-zone");
        assert_eq!(json["properties"]["domain_name"], "example.com");
        assert_eq!(spec.properties()["domain_name"], "example.com");

        let back: ResourceSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_kind_round_trip_names() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
    }
}
