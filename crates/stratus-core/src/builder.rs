//! リソースグラフの構築
//!
//! [`StackSettings`] から決定的に [`ResourceGraph`] を組み立てる。
//! 構築順は network → cluster → サービス名順の各サービスのサブグラフ。
//! DNS ゾーンとデータベースは最初に必要になった時点で1度だけ作り、以降は再利用する。
//! どのサービスも使わないが有効化されたデータベースは、最後に追加する。

use crate::error::GraphError;
use crate::graph::ResourceGraph;
use crate::model::{
    ClusterSpec, DatabaseSpec, DnsRecordSpec, DnsZoneSpec, IngressRule, Interpolated,
    LoadBalancerSpec, NetworkSpec, Reference, RemovalPolicy, ResourceNode, ResourceSpec,
    SecretSpec, SecurityGroupSpec, ServiceSpec, outputs,
};
use crate::settings::{DatabaseSettings, ServiceSettings, StackSettings};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// 固定のノード名
pub mod names {
    pub const NETWORK: &str = "network";
    pub const CLUSTER: &str = "cluster";
    pub const DNS_ZONE: &str = "dns-zone";
    pub const DATABASE_PASSWORD: &str = "database-password";
    pub const DATABASE_SG: &str = "database-sg";
    pub const DATABASE: &str = "database";

    /// サービスのロードバランサー
    pub fn load_balancer(service: &str) -> String {
        format!("{}-lb", service)
    }

    /// サービスの DNS レコード
    pub fn dns_record(service: &str) -> String {
        format!("{}-dns", service)
    }
}

const HTTPS_PORT: u16 = 443;
const HEALTH_CHECK_PATH: &str = "/";
const DATABASE_STORAGE_TYPE: &str = "gp2";
/// ロードバランサー名の上限
const MAX_LB_NAME_LEN: usize = 32;

/// 設定からグラフを構築
#[instrument(skip(settings), fields(stack = %settings.stack_id()))]
pub fn build_graph(settings: &StackSettings) -> Result<ResourceGraph, GraphError> {
    let graph = GraphBuilder::new(settings).build()?;
    info!(nodes = graph.len(), "Resource graph built");
    Ok(graph)
}

/// グラフビルダー
pub struct GraphBuilder<'a> {
    settings: &'a StackSettings,
    stack_id: String,
    graph: ResourceGraph,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(settings: &'a StackSettings) -> Self {
        Self {
            settings,
            stack_id: settings.stack_id(),
            graph: ResourceGraph::new(),
        }
    }

    pub fn build(mut self) -> Result<ResourceGraph, GraphError> {
        self.add_network()?;
        self.add_cluster()?;
        let settings = self.settings;
        for service in &settings.services {
            self.add_service(service)?;
        }
        // database.enabled で明示的に有効化され、どのサービスも使っていない場合
        if let Some(database) = &settings.database {
            self.ensure_database(database)?;
        }
        self.graph.validate()?;
        Ok(self.graph)
    }

    fn add(&mut self, name: impl Into<String>, spec: ResourceSpec) -> Result<(), GraphError> {
        self.graph.insert(ResourceNode::new(name, spec))
    }

    fn add_network(&mut self) -> Result<(), GraphError> {
        let network = &self.settings.network;
        self.add(
            names::NETWORK,
            ResourceSpec::Network(NetworkSpec {
                cidr: network.cidr.clone(),
                subnet_cidrs: network.subnet_cidrs.clone(),
            }),
        )
    }

    fn add_cluster(&mut self) -> Result<(), GraphError> {
        self.add(
            names::CLUSTER,
            ResourceSpec::Cluster(ClusterSpec {
                cluster_name: self.settings.cluster_name.clone(),
                vpc: Reference::new(names::NETWORK, outputs::ID),
            }),
        )
    }

    fn ensure_zone(&mut self) -> Result<(), GraphError> {
        if self.graph.contains(names::DNS_ZONE) {
            return Ok(());
        }
        self.add(
            names::DNS_ZONE,
            ResourceSpec::DnsZone(DnsZoneSpec {
                domain_name: self.settings.domain_name.clone(),
            }),
        )
    }

    /// データベースのサブグラフ（パスワード → セキュリティグループ → インスタンス）
    fn ensure_database(&mut self, database: &DatabaseSettings) -> Result<(), GraphError> {
        if self.graph.contains(names::DATABASE) {
            return Ok(());
        }
        debug!(engine = %database.engine, "Adding shared database subgraph");

        let mut password = SecretSpec::new(format!("{}/{}", self.stack_id, names::DATABASE_PASSWORD));
        password.length = database.password.length;
        password.exclude_characters = database.password.exclude_characters.clone();
        self.add(names::DATABASE_PASSWORD, ResourceSpec::Secret(password))?;

        self.add(
            names::DATABASE_SG,
            ResourceSpec::SecurityGroup(SecurityGroupSpec {
                group_name: format!("{}-database", self.stack_id),
                description: format!("{} access from the VPC", database.engine),
                vpc: Reference::new(names::NETWORK, outputs::ID),
                ingress: vec![IngressRule {
                    protocol: "tcp".to_string(),
                    port: database.port,
                    cidr: self.settings.network.cidr.clone(),
                    description: "database access from the VPC".to_string(),
                }],
                allow_all_egress: true,
            }),
        )?;

        self.add(
            names::DATABASE,
            ResourceSpec::Database(DatabaseSpec {
                identifier: database.identifier.clone(),
                engine: database.engine,
                engine_version: database.engine_version.clone(),
                database_name: database.database_name.clone(),
                instance_class: database.instance_class.clone(),
                allocated_storage_gb: database.allocated_storage_gb,
                storage_type: DATABASE_STORAGE_TYPE.to_string(),
                storage_encrypted: database.storage_encrypted,
                port: database.port,
                master_username: database.username.clone(),
                master_password: Reference::new(names::DATABASE_PASSWORD, outputs::SECRET),
                security_group: Reference::new(names::DATABASE_SG, outputs::ID),
                subnets: Reference::new(names::NETWORK, outputs::SUBNET_IDS),
                backup_window: database.backup_window.clone(),
                backup_retention_days: database.backup_retention_days,
                maintenance_window: database.maintenance_window.clone(),
                removal_policy: database.removal_policy,
                deletion_protection: database.removal_policy == RemovalPolicy::Retain,
                parameter_family: database.engine.parameter_family(&database.engine_version),
                parameters: database.parameters.clone(),
            }),
        )
    }

    fn add_service(&mut self, service: &ServiceSettings) -> Result<(), GraphError> {
        debug!(service = %service.name, "Adding service subgraph");
        let settings = self.settings;
        self.ensure_zone()?;

        let mut environment: BTreeMap<String, Interpolated> = service
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), Interpolated::literal(v.clone())))
            .collect();
        let mut secrets = BTreeMap::new();

        if service.use_database
            && let Some(database) = &settings.database
        {
            self.ensure_database(database)?;

            let prefix = database.engine.env_prefix();
            environment.insert(
                format!("{}_HOST", prefix),
                Interpolated::reference(Reference::new(names::DATABASE, outputs::ENDPOINT_ADDRESS))
                    .push_text(":")
                    .push_ref(Reference::new(names::DATABASE, outputs::ENDPOINT_PORT)),
            );
            environment.insert(
                database.engine.database_env_var().to_string(),
                Interpolated::literal(
                    service
                        .database_name
                        .clone()
                        .unwrap_or_else(|| database.database_name.clone()),
                ),
            );
            environment.insert(
                format!("{}_USER", prefix),
                Interpolated::literal(database.username.clone()),
            );
            secrets.insert(
                format!("{}_PASSWORD", prefix),
                Reference::new(names::DATABASE_PASSWORD, outputs::SECRET),
            );
        }

        for secret in &service.secrets {
            let mut spec = SecretSpec::new(format!("{}/{}", self.stack_id, secret.node_name));
            spec.length = secret.generation.length;
            spec.exclude_characters = secret.generation.exclude_characters.clone();
            self.add(&secret.node_name, ResourceSpec::Secret(spec))?;
            secrets.insert(
                secret.env_var.clone(),
                Reference::new(&secret.node_name, outputs::SECRET),
            );
        }

        let lb = names::load_balancer(&service.name);
        self.add(
            &lb,
            ResourceSpec::LoadBalancer(LoadBalancerSpec {
                lb_name: self.load_balancer_name(&service.name),
                vpc: Reference::new(names::NETWORK, outputs::ID),
                subnets: Reference::new(names::NETWORK, outputs::SUBNET_IDS),
                // サービスがあれば from_tree で必須になっている
                certificate_arn: self.settings.certificate_arn.clone().unwrap_or_default(),
                listener_port: HTTPS_PORT,
                target_port: service.container_port,
                health_check_path: HEALTH_CHECK_PATH.to_string(),
            }),
        )?;

        let hostname = service.hostname(&self.settings.domain_name);
        self.add(
            &service.name,
            ResourceSpec::Service(ServiceSpec {
                service_name: format!("{}-{}", self.stack_id, service.name),
                container_name: service.name.clone(),
                image: service.image.clone(),
                desired_count: service.desired_count,
                memory_limit_mib: service.memory_limit_mib,
                container_port: service.container_port,
                hostname: hostname.clone(),
                cluster: Reference::new(names::CLUSTER, outputs::ARN),
                subnets: Reference::new(names::NETWORK, outputs::SUBNET_IDS),
                target_group: Reference::new(&lb, outputs::TARGET_GROUP_ARN),
                environment,
                secrets,
            }),
        )?;

        self.add(
            names::dns_record(&service.name),
            ResourceSpec::DnsRecord(DnsRecordSpec {
                record_name: hostname,
                zone: Reference::new(names::DNS_ZONE, outputs::ZONE_ID),
                target_dns_name: Reference::new(&lb, outputs::DNS_NAME),
                target_zone_id: Reference::new(&lb, outputs::CANONICAL_ZONE_ID),
            }),
        )
    }

    fn load_balancer_name(&self, service: &str) -> String {
        let mut name = format!("{}-{}", self.stack_id, service);
        name.truncate(MAX_LB_NAME_LEN);
        name.trim_end_matches('-').to_string()
    }
}
