//! Application load balancer and ECS Fargate service

use crate::awscli::{Args, AwsCli, first_at, str_at};
use crate::error::{AwsError, Result};
use crate::tags::ResourceTags;
use serde_json::{Value, json};
use stratus_cloud::{Outputs, ResolvedInputs};
use stratus_core::{LoadBalancerSpec, ServiceSpec, outputs};
use tracing::info;

/// Target group names share the 32 character limit of load balancer names
const MAX_NAME_LEN: usize = 32;
const TARGET_GROUP_SUFFIX: &str = "-tg";
const CLUSTER_ARN: &str = "cluster_arn";
const TASK_DEFINITION_ARN: &str = "task_definition_arn";
/// Fargate CPU units per task
const TASK_CPU: &str = "256";

pub async fn read_load_balancer(
    cli: &AwsCli,
    spec: &LoadBalancerSpec,
) -> Result<Option<Outputs>> {
    let Some(described) = cli
        .run_optional(&Args::new("elbv2", "describe-load-balancers").values("--names", [&spec.lb_name]))
        .await?
    else {
        return Ok(None);
    };
    let Some(lb) = first_at(&described, "/LoadBalancers") else {
        return Ok(None);
    };
    let groups = cli
        .run_optional(
            &Args::new("elbv2", "describe-target-groups")
                .values("--names", [target_group_name(&spec.lb_name)]),
        )
        .await?;
    let Some(group) = groups.as_ref().and_then(|g| first_at(g, "/TargetGroups")) else {
        return Ok(None);
    };
    load_balancer_outputs(lb, str_at(group, "/TargetGroupArn")?).map(Some)
}

pub async fn create_load_balancer(
    cli: &AwsCli,
    tags: &ResourceTags,
    spec: &LoadBalancerSpec,
    inputs: &ResolvedInputs,
) -> Result<Outputs> {
    let group = cli
        .run(
            &Args::new("elbv2", "create-target-group")
                .opt("--name", target_group_name(&spec.lb_name))
                .opt("--protocol", "HTTP")
                .opt("--port", spec.target_port.to_string())
                .opt("--vpc-id", inputs.plain(&spec.vpc)?)
                .opt("--target-type", "ip")
                .opt("--health-check-path", &spec.health_check_path)
                .json("--tags", &tags.pascal()),
        )
        .await?;
    let target_group_arn = str_at(&group, "/TargetGroups/0/TargetGroupArn")?.to_string();

    let subnets: Vec<&str> = inputs.plain(&spec.subnets)?.split(',').collect();
    let created = cli
        .run(
            &Args::new("elbv2", "create-load-balancer")
                .opt("--name", &spec.lb_name)
                .values("--subnets", subnets)
                .opt("--type", "application")
                .opt("--scheme", "internet-facing")
                .json("--tags", &tags.pascal()),
        )
        .await?;
    let lb = first_at(&created, "/LoadBalancers")
        .ok_or_else(|| AwsError::UnexpectedResponse("no load balancer returned".to_string()))?;
    let lb_arn = str_at(lb, "/LoadBalancerArn")?;
    info!(name = %spec.lb_name, "Created load balancer");

    cli.run(
        &Args::new("elbv2", "wait")
            .flag("load-balancer-available")
            .values("--load-balancer-arns", [lb_arn]),
    )
    .await?;
    cli.run(
        &Args::new("elbv2", "create-listener")
            .opt("--load-balancer-arn", lb_arn)
            .opt("--protocol", "HTTPS")
            .opt("--port", spec.listener_port.to_string())
            .json("--certificates", &json!([{ "CertificateArn": spec.certificate_arn }]))
            .json(
                "--default-actions",
                &json!([{ "Type": "forward", "TargetGroupArn": target_group_arn }]),
            ),
    )
    .await?;

    load_balancer_outputs(lb, &target_group_arn)
}

/// Health check is the only property changed in place
pub async fn update_load_balancer(
    cli: &AwsCli,
    spec: &LoadBalancerSpec,
    current: &Outputs,
) -> Result<Outputs> {
    let target_group_arn = current.plain(outputs::TARGET_GROUP_ARN).ok_or_else(|| {
        AwsError::UnexpectedResponse("load balancer has no target group".to_string())
    })?;
    cli.run(
        &Args::new("elbv2", "modify-target-group")
            .opt("--target-group-arn", target_group_arn)
            .opt("--health-check-path", &spec.health_check_path),
    )
    .await?;
    Ok(current.clone())
}

pub async fn delete_load_balancer(cli: &AwsCli, recorded: &Outputs) -> Result<()> {
    if let Some(lb_arn) = recorded.plain(outputs::ARN) {
        cli.run_optional(&Args::new("elbv2", "delete-load-balancer").opt("--load-balancer-arn", lb_arn))
            .await?;
        cli.run(
            &Args::new("elbv2", "wait")
                .flag("load-balancers-deleted")
                .values("--load-balancer-arns", [lb_arn]),
        )
        .await?;
    }
    if let Some(group_arn) = recorded.plain(outputs::TARGET_GROUP_ARN) {
        cli.run_optional(&Args::new("elbv2", "delete-target-group").opt("--target-group-arn", group_arn))
            .await?;
    }
    Ok(())
}

/// Look the service up through its recorded cluster, or through its tags
pub async fn read_service(
    cli: &AwsCli,
    tags: &ResourceTags,
    spec: &ServiceSpec,
    recorded: Option<&Outputs>,
) -> Result<Option<Outputs>> {
    let cluster = match recorded.and_then(|o| o.plain(CLUSTER_ARN)) {
        Some(cluster) => cluster.to_string(),
        None => {
            let found = cli
                .run(
                    &Args::new("resourcegroupstaggingapi", "get-resources")
                        .values("--resource-type-filters", ["ecs:service"])
                        .json("--tag-filters", &tags.tag_filters()),
                )
                .await?;
            let arn = first_at(&found, "/ResourceTagMappingList")
                .and_then(|m| m["ResourceARN"].as_str());
            match arn.and_then(cluster_from_service_arn) {
                Some(cluster) => cluster,
                None => return Ok(None),
            }
        }
    };

    let described = cli
        .run(
            &Args::new("ecs", "describe-services")
                .opt("--cluster", &cluster)
                .values("--services", [&spec.service_name]),
        )
        .await?;
    let active = described
        .pointer("/services")
        .and_then(Value::as_array)
        .and_then(|items| items.iter().find(|s| s["status"] == "ACTIVE"));
    match active {
        Some(service) => Ok(Some(service_outputs(
            spec,
            str_at(service, "/serviceArn")?,
            str_at(service, "/clusterArn")?,
            str_at(service, "/taskDefinition")?,
        ))),
        None => Ok(None),
    }
}

pub async fn create_service(
    cli: &AwsCli,
    tags: &ResourceTags,
    spec: &ServiceSpec,
    inputs: &ResolvedInputs,
    execution_role_arn: Option<&str>,
) -> Result<Outputs> {
    let task_definition = register_task_definition(cli, tags, spec, inputs, execution_role_arn).await?;
    let cluster = inputs.plain(&spec.cluster)?;
    let subnets: Vec<&str> = inputs.plain(&spec.subnets)?.split(',').collect();

    let created = cli
        .run(
            &Args::new("ecs", "create-service")
                .opt("--cluster", cluster)
                .opt("--service-name", &spec.service_name)
                .opt("--task-definition", &task_definition)
                .opt("--desired-count", spec.desired_count.to_string())
                .opt("--launch-type", "FARGATE")
                .json(
                    "--network-configuration",
                    &json!({ "awsvpcConfiguration": { "subnets": subnets, "assignPublicIp": "ENABLED" } }),
                )
                .json(
                    "--load-balancers",
                    &json!([{
                        "targetGroupArn": inputs.plain(&spec.target_group)?,
                        "containerName": spec.container_name,
                        "containerPort": spec.container_port,
                    }]),
                )
                .opt("--propagate-tags", "SERVICE")
                .json("--tags", &tags.camel()),
        )
        .await?;
    info!(service = %spec.service_name, "Created ECS service");

    Ok(service_outputs(
        spec,
        str_at(&created, "/service/serviceArn")?,
        cluster,
        &task_definition,
    ))
}

pub async fn update_service(
    cli: &AwsCli,
    tags: &ResourceTags,
    spec: &ServiceSpec,
    inputs: &ResolvedInputs,
    execution_role_arn: Option<&str>,
) -> Result<Outputs> {
    let task_definition = register_task_definition(cli, tags, spec, inputs, execution_role_arn).await?;
    let cluster = inputs.plain(&spec.cluster)?;
    let updated = cli
        .run(
            &Args::new("ecs", "update-service")
                .opt("--cluster", cluster)
                .opt("--service", &spec.service_name)
                .opt("--task-definition", &task_definition)
                .opt("--desired-count", spec.desired_count.to_string()),
        )
        .await?;
    Ok(service_outputs(
        spec,
        str_at(&updated, "/service/serviceArn")?,
        cluster,
        &task_definition,
    ))
}

pub async fn delete_service(cli: &AwsCli, spec: &ServiceSpec, recorded: &Outputs) -> Result<()> {
    let cluster = recorded.plain(CLUSTER_ARN).ok_or_else(|| {
        AwsError::UnexpectedResponse("service has no recorded cluster".to_string())
    })?;
    cli.run_optional(
        &Args::new("ecs", "delete-service")
            .opt("--cluster", cluster)
            .opt("--service", &spec.service_name)
            .flag("--force"),
    )
    .await?;
    cli.run(
        &Args::new("ecs", "wait")
            .flag("services-inactive")
            .opt("--cluster", cluster)
            .values("--services", [&spec.service_name]),
    )
    .await?;
    if let Some(task_definition) = recorded.plain(TASK_DEFINITION_ARN) {
        cli.run_optional(
            &Args::new("ecs", "deregister-task-definition").opt("--task-definition", task_definition),
        )
        .await?;
    }
    Ok(())
}

async fn register_task_definition(
    cli: &AwsCli,
    tags: &ResourceTags,
    spec: &ServiceSpec,
    inputs: &ResolvedInputs,
    execution_role_arn: Option<&str>,
) -> Result<String> {
    let registered = cli
        .run(
            &Args::new("ecs", "register-task-definition")
                .opt("--family", &spec.service_name)
                .values("--requires-compatibilities", ["FARGATE"])
                .opt("--network-mode", "awsvpc")
                .opt("--cpu", TASK_CPU)
                .opt("--memory", spec.memory_limit_mib.to_string())
                .opt_if("--execution-role-arn", execution_role_arn)
                .json("--container-definitions", &container_definitions(spec, inputs)?)
                .json("--tags", &tags.camel()),
        )
        .await?;
    Ok(str_at(&registered, "/taskDefinition/taskDefinitionArn")?.to_string())
}

/// Container definition with resolved environment; secrets are passed by ARN
fn container_definitions(spec: &ServiceSpec, inputs: &ResolvedInputs) -> Result<Value> {
    let environment = spec
        .environment
        .iter()
        .map(|(name, value)| Ok(json!({ "name": name, "value": inputs.interpolate(value)? })))
        .collect::<Result<Vec<_>>>()?;
    let secrets = spec
        .secrets
        .iter()
        .map(|(name, reference)| {
            Ok(json!({ "name": name, "valueFrom": inputs.secret(reference)?.as_str() }))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(json!([{
        "name": spec.container_name,
        "image": spec.image,
        "essential": true,
        "memory": spec.memory_limit_mib,
        "portMappings": [{ "containerPort": spec.container_port, "protocol": "tcp" }],
        "environment": environment,
        "secrets": secrets,
    }]))
}

fn load_balancer_outputs(lb: &Value, target_group_arn: &str) -> Result<Outputs> {
    Ok(Outputs::new()
        .with_plain(outputs::ARN, str_at(lb, "/LoadBalancerArn")?)
        .with_plain(outputs::DNS_NAME, str_at(lb, "/DNSName")?)
        .with_plain(outputs::CANONICAL_ZONE_ID, str_at(lb, "/CanonicalHostedZoneId")?)
        .with_plain(outputs::TARGET_GROUP_ARN, target_group_arn))
}

fn service_outputs(spec: &ServiceSpec, arn: &str, cluster: &str, task_definition: &str) -> Outputs {
    Outputs::new()
        .with_plain(outputs::ID, &spec.service_name)
        .with_plain(outputs::ARN, arn)
        .with_plain(CLUSTER_ARN, cluster)
        .with_plain(TASK_DEFINITION_ARN, task_definition)
}

/// `<lb name>-tg`, shortened to fit the name limit
fn target_group_name(lb_name: &str) -> String {
    let keep = MAX_NAME_LEN - TARGET_GROUP_SUFFIX.len();
    let base: String = lb_name.chars().take(keep).collect();
    format!("{}{}", base.trim_end_matches('-'), TARGET_GROUP_SUFFIX)
}

/// Cluster name from `arn:aws:ecs:<region>:<account>:service/<cluster>/<service>`
fn cluster_from_service_arn(arn: &str) -> Option<String> {
    let resource = arn.split(':').nth(5)?;
    let mut parts = resource.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("service"), Some(cluster), Some(_)) => Some(cluster.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use stratus_cloud::{OutputValue, SecretHandle};
    use stratus_core::{Interpolated, Reference};

    fn spec() -> ServiceSpec {
        let mut environment = BTreeMap::new();
        environment.insert(
            "MYSQL_HOST".to_string(),
            Interpolated::reference(Reference::new("database", outputs::ENDPOINT_ADDRESS))
                .push_text(":")
                .push_ref(Reference::new("database", outputs::ENDPOINT_PORT)),
        );
        let mut secrets = BTreeMap::new();
        secrets.insert(
            "MYSQL_PASSWORD".to_string(),
            Reference::new("database-password", outputs::SECRET),
        );
        ServiceSpec {
            service_name: "web".to_string(),
            container_name: "web".to_string(),
            image: "web:1".to_string(),
            desired_count: 2,
            memory_limit_mib: 512,
            container_port: 80,
            hostname: "www.example.com".to_string(),
            cluster: Reference::new("cluster", outputs::ARN),
            subnets: Reference::new("network", outputs::SUBNET_IDS),
            target_group: Reference::new("web-lb", outputs::TARGET_GROUP_ARN),
            environment,
            secrets,
        }
    }

    #[test]
    fn test_container_definitions_pass_secrets_by_reference() {
        let mut inputs = ResolvedInputs::new();
        inputs.insert(
            Reference::new("database", outputs::ENDPOINT_ADDRESS),
            OutputValue::Plain("db.internal".to_string()),
        );
        inputs.insert(
            Reference::new("database", outputs::ENDPOINT_PORT),
            OutputValue::Plain("3306".to_string()),
        );
        inputs.insert(
            Reference::new("database-password", outputs::SECRET),
            OutputValue::Secret(SecretHandle::new("arn:aws:secretsmanager:x:1:secret:db")),
        );

        let definitions = container_definitions(&spec(), &inputs).unwrap();
        let container = &definitions[0];
        assert_eq!(container["environment"][0]["value"], "db.internal:3306");
        assert_eq!(container["secrets"][0]["name"], "MYSQL_PASSWORD");
        assert_eq!(
            container["secrets"][0]["valueFrom"],
            "arn:aws:secretsmanager:x:1:secret:db"
        );
    }

    #[test]
    fn test_container_definitions_require_resolved_inputs() {
        assert!(container_definitions(&spec(), &ResolvedInputs::new()).is_err());
    }

    #[test]
    fn test_target_group_name_fits_limit() {
        assert_eq!(target_group_name("web-lb"), "web-lb-tg");
        let long = target_group_name("shop-production-administration-lb");
        assert!(long.len() <= MAX_NAME_LEN);
        assert!(long.ends_with("-tg"));
        assert!(!long.contains("--"));
    }

    #[test]
    fn test_cluster_from_service_arn() {
        assert_eq!(
            cluster_from_service_arn("arn:aws:ecs:ap-northeast-1:123:service/shop-cluster/web"),
            Some("shop-cluster".to_string())
        );
        assert_eq!(
            cluster_from_service_arn("arn:aws:ecs:ap-northeast-1:123:cluster/shop-cluster"),
            None
        );
    }
}
