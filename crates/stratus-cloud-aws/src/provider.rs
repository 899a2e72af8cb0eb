//! AWS provider implementation

use crate::awscli::AwsCli;
use crate::error::AwsError;
use crate::tags::ResourceTags;
use crate::{database, dns, network, secrets, service};
use async_trait::async_trait;
use stratus_cloud::{
    AuthStatus, CloudError, CloudProvider, Outputs, ResolvedInputs, Result, SecretHandle,
};
use stratus_core::{ResourceNode, ResourceSpec, SecretSpec};

/// Settings for [`AwsProvider`]
#[derive(Debug, Clone, Default)]
pub struct AwsOptions {
    /// Region passed to every command; falls back to the CLI's own configuration
    pub region: Option<String>,
    /// Named profile from the shared credentials file
    pub profile: Option<String>,
    /// Stack id written into the ownership tags
    pub stack_id: String,
    /// Task execution role, required when services read secrets
    pub execution_role_arn: Option<String>,
}

/// AWS provider
pub struct AwsProvider {
    cli: AwsCli,
    stack_id: String,
    execution_role_arn: Option<String>,
}

impl AwsProvider {
    pub fn new(options: AwsOptions) -> Self {
        Self {
            cli: AwsCli::new(options.region, options.profile),
            stack_id: options.stack_id,
            execution_role_arn: options.execution_role_arn,
        }
    }

    fn tags(&self, node: &ResourceNode) -> ResourceTags {
        ResourceTags::new(&self.stack_id, &node.name)
    }

    fn execution_role(&self) -> Option<&str> {
        self.execution_role_arn.as_deref()
    }
}

fn replacement_required(node: &ResourceNode) -> CloudError {
    AwsError::ReplacementRequired(format!("{} '{}'", node.kind(), node.name)).into()
}

#[async_trait]
impl CloudProvider for AwsProvider {
    fn name(&self) -> &str {
        "aws"
    }

    fn display_name(&self) -> &str {
        "Amazon Web Services"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        match self.cli.caller_identity().await {
            Ok(identity) => Ok(AuthStatus::ok(format!(
                "{} ({})",
                identity.arn, identity.account
            ))),
            Err(AwsError::CliNotFound) => Ok(AuthStatus::failed("aws CLI is not installed")),
            Err(e) => Ok(AuthStatus::failed(e.to_string())),
        }
    }

    fn render(&self, node: &ResourceNode, inputs: &ResolvedInputs) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "kind": node.kind(),
            "name": node.name,
            "region": self.cli.region(),
            "tags": self.tags(node).pascal(),
            "properties": inputs.render_properties(node)?,
        }))
    }

    async fn read(
        &self,
        node: &ResourceNode,
        recorded: Option<&Outputs>,
    ) -> Result<Option<Outputs>> {
        let tags = self.tags(node);
        let cli = &self.cli;
        let read = match &node.spec {
            ResourceSpec::Network(spec) => network::read_network(cli, &tags, spec, recorded).await,
            ResourceSpec::SecurityGroup(spec) => {
                network::read_security_group(cli, &tags, spec, recorded).await
            }
            ResourceSpec::Cluster(spec) => network::read_cluster(cli, spec).await,
            ResourceSpec::DnsZone(spec) => dns::read_zone(cli, spec).await,
            ResourceSpec::Secret(spec) => secrets::read_secret(cli, spec).await,
            ResourceSpec::Database(spec) => database::read_database(cli, spec).await,
            ResourceSpec::LoadBalancer(spec) => service::read_load_balancer(cli, spec).await,
            ResourceSpec::Service(spec) => service::read_service(cli, &tags, spec, recorded).await,
            ResourceSpec::DnsRecord(spec) => dns::read_record(cli, spec, recorded).await,
        };
        Ok(read?)
    }

    async fn create(&self, node: &ResourceNode, inputs: &ResolvedInputs) -> Result<Outputs> {
        let tags = self.tags(node);
        let cli = &self.cli;
        let created = match &node.spec {
            ResourceSpec::Network(spec) => network::create_network(cli, &tags, spec).await,
            ResourceSpec::SecurityGroup(spec) => {
                network::create_security_group(cli, &tags, spec, inputs).await
            }
            ResourceSpec::Cluster(spec) => network::create_cluster(cli, &tags, spec).await,
            ResourceSpec::DnsZone(spec) => dns::create_zone(cli, &node.name, spec).await,
            ResourceSpec::Secret(_) => {
                return Err(CloudError::InvalidConfig(format!(
                    "secret '{}' must be created through generate_secret",
                    node.name
                )));
            }
            ResourceSpec::Database(spec) => {
                database::create_database(cli, &tags, spec, inputs).await
            }
            ResourceSpec::LoadBalancer(spec) => {
                service::create_load_balancer(cli, &tags, spec, inputs).await
            }
            ResourceSpec::Service(spec) => {
                service::create_service(cli, &tags, spec, inputs, self.execution_role()).await
            }
            ResourceSpec::DnsRecord(spec) => dns::upsert_record(cli, spec, inputs).await,
        };
        Ok(created?)
    }

    async fn update(
        &self,
        node: &ResourceNode,
        inputs: &ResolvedInputs,
        current: &Outputs,
    ) -> Result<Outputs> {
        let tags = self.tags(node);
        let cli = &self.cli;
        let updated = match &node.spec {
            ResourceSpec::Network(_)
            | ResourceSpec::SecurityGroup(_)
            | ResourceSpec::Cluster(_)
            | ResourceSpec::DnsZone(_) => return Err(replacement_required(node)),
            // Generation parameters only matter when the value is first created
            ResourceSpec::Secret(_) => return Ok(current.clone()),
            ResourceSpec::Database(spec) => database::update_database(cli, spec, current).await,
            ResourceSpec::LoadBalancer(spec) => {
                service::update_load_balancer(cli, spec, current).await
            }
            ResourceSpec::Service(spec) => {
                service::update_service(cli, &tags, spec, inputs, self.execution_role()).await
            }
            ResourceSpec::DnsRecord(spec) => dns::upsert_record(cli, spec, inputs).await,
        };
        Ok(updated?)
    }

    async fn delete(&self, node: &ResourceNode, recorded: &Outputs) -> Result<()> {
        let cli = &self.cli;
        let deleted = match &node.spec {
            ResourceSpec::Network(_) => network::delete_network(cli, recorded).await,
            ResourceSpec::SecurityGroup(_) => network::delete_security_group(cli, recorded).await,
            ResourceSpec::Cluster(spec) => network::delete_cluster(cli, spec).await,
            ResourceSpec::DnsZone(_) => dns::delete_zone(cli, recorded).await,
            ResourceSpec::Secret(spec) => secrets::delete_secret(cli, spec, recorded).await,
            ResourceSpec::Database(spec) => database::delete_database(cli, spec).await,
            ResourceSpec::LoadBalancer(_) => service::delete_load_balancer(cli, recorded).await,
            ResourceSpec::Service(spec) => service::delete_service(cli, spec, recorded).await,
            ResourceSpec::DnsRecord(spec) => dns::delete_record(cli, spec, recorded).await,
        };
        match deleted {
            Ok(()) => Ok(()),
            // Already gone
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn generate_secret(
        &self,
        node: &ResourceNode,
        spec: &SecretSpec,
    ) -> Result<SecretHandle> {
        Ok(secrets::generate_secret(&self.cli, &self.tags(node), spec).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_cloud::{OutputValue, secret_outputs};
    use stratus_core::{DnsZoneSpec, Reference, SecurityGroupSpec, outputs};

    fn provider() -> AwsProvider {
        AwsProvider::new(AwsOptions {
            region: Some("ap-northeast-1".to_string()),
            stack_id: "shop-staging".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_render_includes_tags_and_region() {
        let node = ResourceNode::new(
            "dns-zone",
            ResourceSpec::DnsZone(DnsZoneSpec {
                domain_name: "example.com".to_string(),
            }),
        );
        let payload = provider().render(&node, &ResolvedInputs::new()).unwrap();

        assert_eq!(payload["region"], "ap-northeast-1");
        assert_eq!(payload["tags"][0]["Value"], "shop-staging");
        assert_eq!(payload["properties"]["domain_name"], "example.com");
    }

    #[test]
    fn test_render_keeps_secret_handles() {
        let node = ResourceNode::new(
            "database-sg",
            ResourceSpec::SecurityGroup(SecurityGroupSpec {
                group_name: "db".to_string(),
                description: "database".to_string(),
                vpc: Reference::new("network", outputs::ID),
                ingress: Vec::new(),
                allow_all_egress: true,
            }),
        );
        let mut inputs = ResolvedInputs::new();
        inputs.insert(
            Reference::new("network", outputs::ID),
            OutputValue::Plain("vpc-123".to_string()),
        );
        let payload = provider().render(&node, &inputs).unwrap();
        assert_eq!(payload["properties"]["vpc"], "vpc-123");

        let handle = SecretHandle::new("arn:aws:secretsmanager:x:1:secret:db");
        let secret = secret_outputs(handle.clone());
        assert_eq!(
            secret.get(outputs::SECRET).unwrap().to_payload()["secret"],
            handle.as_str()
        );
    }

    #[tokio::test]
    async fn test_secret_create_is_rejected() {
        let node = ResourceNode::new(
            "database-password",
            ResourceSpec::Secret(SecretSpec::new("shop-staging/database-password")),
        );
        let err = provider()
            .create(&node, &ResolvedInputs::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_network_update_requires_replacement() {
        let node = ResourceNode::new(
            "dns-zone",
            ResourceSpec::DnsZone(DnsZoneSpec {
                domain_name: "example.com".to_string(),
            }),
        );
        let err = provider()
            .update(&node, &ResolvedInputs::new(), &Outputs::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must be replaced"));
    }
}
