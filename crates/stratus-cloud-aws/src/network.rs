//! VPC, security group and ECS cluster

use crate::awscli::{Args, AwsCli, first_at, str_at};
use crate::error::{AwsError, Result};
use crate::tags::ResourceTags;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use stratus_cloud::{Outputs, ResolvedInputs};
use stratus_core::{ClusterSpec, NetworkSpec, SecurityGroupSpec, outputs};
use tracing::info;

const INTERNET_GATEWAY_ID: &str = "internet_gateway_id";

pub async fn read_network(
    cli: &AwsCli,
    tags: &ResourceTags,
    spec: &NetworkSpec,
    recorded: Option<&Outputs>,
) -> Result<Option<Outputs>> {
    let found = match recorded.and_then(|o| o.plain(outputs::ID)) {
        Some(id) => cli
            .run_optional(&Args::new("ec2", "describe-vpcs").values("--vpc-ids", [id]))
            .await?,
        None => Some(
            cli.run(&Args::new("ec2", "describe-vpcs").values("--filters", tags.ec2_filters()))
                .await?,
        ),
    };
    let Some(vpc) = found.as_ref().and_then(|v| first_at(v, "/Vpcs")) else {
        return Ok(None);
    };
    let vpc_id = str_at(vpc, "/VpcId")?;

    let subnets = cli
        .run(&Args::new("ec2", "describe-subnets").values("--filters", [vpc_filter(vpc_id)]))
        .await?;
    let subnet_ids = order_subnets(&subnets, &spec.subnet_cidrs)?;

    let mut read = network_outputs(vpc_id, &subnet_ids);
    if let Some(igw) = recorded.and_then(|o| o.plain(INTERNET_GATEWAY_ID)) {
        read.insert_plain(INTERNET_GATEWAY_ID, igw);
    }
    Ok(Some(read))
}

pub async fn create_network(
    cli: &AwsCli,
    tags: &ResourceTags,
    spec: &NetworkSpec,
) -> Result<Outputs> {
    let created = cli
        .run(
            &Args::new("ec2", "create-vpc")
                .opt("--cidr-block", &spec.cidr)
                .json("--tag-specifications", &tags.ec2_specification("vpc")),
        )
        .await?;
    let vpc_id = str_at(&created, "/Vpc/VpcId")?.to_string();
    info!(vpc_id = %vpc_id, "Created VPC");

    cli.run(
        &Args::new("ec2", "wait")
            .flag("vpc-available")
            .values("--vpc-ids", [&vpc_id]),
    )
    .await?;
    cli.run(
        &Args::new("ec2", "modify-vpc-attribute")
            .opt("--vpc-id", &vpc_id)
            .json("--enable-dns-hostnames", &json!({ "Value": true })),
    )
    .await?;

    let zones = cli
        .run(
            &Args::new("ec2", "describe-availability-zones")
                .values("--filters", ["Name=state,Values=available"]),
        )
        .await?;
    let zones: Vec<&str> = zones
        .pointer("/AvailabilityZones")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|z| z["ZoneName"].as_str()).collect())
        .unwrap_or_default();
    if zones.is_empty() {
        return Err(AwsError::UnexpectedResponse(
            "no availability zones available".to_string(),
        ));
    }

    let mut subnet_ids = Vec::with_capacity(spec.subnet_cidrs.len());
    for (index, cidr) in spec.subnet_cidrs.iter().enumerate() {
        let subnet = cli
            .run(
                &Args::new("ec2", "create-subnet")
                    .opt("--vpc-id", &vpc_id)
                    .opt("--cidr-block", cidr)
                    .opt("--availability-zone", zones[index % zones.len()])
                    .json("--tag-specifications", &tags.ec2_specification("subnet")),
            )
            .await?;
        let subnet_id = str_at(&subnet, "/Subnet/SubnetId")?.to_string();
        cli.run(
            &Args::new("ec2", "modify-subnet-attribute")
                .opt("--subnet-id", &subnet_id)
                .flag("--map-public-ip-on-launch"),
        )
        .await?;
        subnet_ids.push(subnet_id);
    }

    // Public subnets route through an internet gateway
    let gateway = cli
        .run(
            &Args::new("ec2", "create-internet-gateway")
                .json("--tag-specifications", &tags.ec2_specification("internet-gateway")),
        )
        .await?;
    let igw_id = str_at(&gateway, "/InternetGateway/InternetGatewayId")?.to_string();
    cli.run(
        &Args::new("ec2", "attach-internet-gateway")
            .opt("--internet-gateway-id", &igw_id)
            .opt("--vpc-id", &vpc_id),
    )
    .await?;

    let tables = cli
        .run(&Args::new("ec2", "describe-route-tables").values(
            "--filters",
            [vpc_filter(&vpc_id), "Name=association.main,Values=true".to_string()],
        ))
        .await?;
    let main_table = first_at(&tables, "/RouteTables")
        .ok_or_else(|| AwsError::UnexpectedResponse("VPC has no main route table".to_string()))?;
    cli.run(
        &Args::new("ec2", "create-route")
            .opt("--route-table-id", str_at(main_table, "/RouteTableId")?)
            .opt("--destination-cidr-block", "0.0.0.0/0")
            .opt("--gateway-id", &igw_id),
    )
    .await?;

    let mut created = network_outputs(&vpc_id, &subnet_ids);
    created.insert_plain(INTERNET_GATEWAY_ID, igw_id);
    Ok(created)
}

pub async fn delete_network(cli: &AwsCli, recorded: &Outputs) -> Result<()> {
    let vpc_id = recorded
        .plain(outputs::ID)
        .ok_or_else(|| AwsError::UnexpectedResponse("network has no recorded VPC id".to_string()))?;

    let gateways = cli
        .run(&Args::new("ec2", "describe-internet-gateways").values(
            "--filters",
            [format!("Name=attachment.vpc-id,Values={}", vpc_id)],
        ))
        .await?;
    for igw_id in ids_at(&gateways, "/InternetGateways", "InternetGatewayId") {
        cli.run(
            &Args::new("ec2", "detach-internet-gateway")
                .opt("--internet-gateway-id", &igw_id)
                .opt("--vpc-id", vpc_id),
        )
        .await?;
        cli.run(&Args::new("ec2", "delete-internet-gateway").opt("--internet-gateway-id", &igw_id))
            .await?;
    }

    let subnets = cli
        .run(&Args::new("ec2", "describe-subnets").values("--filters", [vpc_filter(vpc_id)]))
        .await?;
    for subnet_id in ids_at(&subnets, "/Subnets", "SubnetId") {
        cli.run(&Args::new("ec2", "delete-subnet").opt("--subnet-id", &subnet_id))
            .await?;
    }

    cli.run(&Args::new("ec2", "delete-vpc").opt("--vpc-id", vpc_id))
        .await?;
    info!(vpc_id, "Deleted VPC");
    Ok(())
}

pub async fn read_security_group(
    cli: &AwsCli,
    tags: &ResourceTags,
    spec: &SecurityGroupSpec,
    recorded: Option<&Outputs>,
) -> Result<Option<Outputs>> {
    let found = match recorded.and_then(|o| o.plain(outputs::ID)) {
        Some(id) => {
            cli.run_optional(&Args::new("ec2", "describe-security-groups").values("--group-ids", [id]))
                .await?
        }
        None => {
            let mut filters = tags.ec2_filters();
            filters.push(format!("Name=group-name,Values={}", spec.group_name));
            Some(
                cli.run(&Args::new("ec2", "describe-security-groups").values("--filters", filters))
                    .await?,
            )
        }
    };
    match found.as_ref().and_then(|v| first_at(v, "/SecurityGroups")) {
        Some(group) => Ok(Some(
            Outputs::new().with_plain(outputs::ID, str_at(group, "/GroupId")?),
        )),
        None => Ok(None),
    }
}

pub async fn create_security_group(
    cli: &AwsCli,
    tags: &ResourceTags,
    spec: &SecurityGroupSpec,
    inputs: &ResolvedInputs,
) -> Result<Outputs> {
    let created = cli
        .run(
            &Args::new("ec2", "create-security-group")
                .opt("--group-name", &spec.group_name)
                .opt("--description", &spec.description)
                .opt("--vpc-id", inputs.plain(&spec.vpc)?)
                .json("--tag-specifications", &tags.ec2_specification("security-group")),
        )
        .await?;
    let group_id = str_at(&created, "/GroupId")?.to_string();

    if !spec.ingress.is_empty() {
        cli.run(
            &Args::new("ec2", "authorize-security-group-ingress")
                .opt("--group-id", &group_id)
                .json("--ip-permissions", &ingress_permissions(spec)),
        )
        .await?;
    }
    if !spec.allow_all_egress {
        cli.run(
            &Args::new("ec2", "revoke-security-group-egress")
                .opt("--group-id", &group_id)
                .json(
                    "--ip-permissions",
                    &json!([{ "IpProtocol": "-1", "IpRanges": [{ "CidrIp": "0.0.0.0/0" }] }]),
                ),
        )
        .await?;
    }

    Ok(Outputs::new().with_plain(outputs::ID, group_id))
}

pub async fn delete_security_group(cli: &AwsCli, recorded: &Outputs) -> Result<()> {
    let group_id = recorded.plain(outputs::ID).ok_or_else(|| {
        AwsError::UnexpectedResponse("security group has no recorded id".to_string())
    })?;
    cli.run(&Args::new("ec2", "delete-security-group").opt("--group-id", group_id))
        .await?;
    Ok(())
}

pub async fn read_cluster(cli: &AwsCli, spec: &ClusterSpec) -> Result<Option<Outputs>> {
    let described = cli
        .run(&Args::new("ecs", "describe-clusters").values("--clusters", [&spec.cluster_name]))
        .await?;
    let active = described
        .pointer("/clusters")
        .and_then(Value::as_array)
        .and_then(|items| items.iter().find(|c| c["status"] == "ACTIVE"));
    match active {
        Some(cluster) => Ok(Some(cluster_outputs(
            &spec.cluster_name,
            str_at(cluster, "/clusterArn")?,
        ))),
        None => Ok(None),
    }
}

pub async fn create_cluster(
    cli: &AwsCli,
    tags: &ResourceTags,
    spec: &ClusterSpec,
) -> Result<Outputs> {
    let created = cli
        .run(
            &Args::new("ecs", "create-cluster")
                .opt("--cluster-name", &spec.cluster_name)
                .json("--tags", &tags.camel()),
        )
        .await?;
    Ok(cluster_outputs(
        &spec.cluster_name,
        str_at(&created, "/cluster/clusterArn")?,
    ))
}

pub async fn delete_cluster(cli: &AwsCli, spec: &ClusterSpec) -> Result<()> {
    cli.run(&Args::new("ecs", "delete-cluster").opt("--cluster", &spec.cluster_name))
        .await?;
    Ok(())
}

fn vpc_filter(vpc_id: &str) -> String {
    format!("Name=vpc-id,Values={}", vpc_id)
}

fn network_outputs(vpc_id: &str, subnet_ids: &[String]) -> Outputs {
    Outputs::new()
        .with_plain(outputs::ID, vpc_id)
        .with_plain(outputs::SUBNET_IDS, subnet_ids.join(","))
}

fn cluster_outputs(name: &str, arn: &str) -> Outputs {
    Outputs::new()
        .with_plain(outputs::ID, name)
        .with_plain(outputs::ARN, arn)
}

/// Subnet ids in the order of the configured CIDR blocks
fn order_subnets(described: &Value, cidrs: &[String]) -> Result<Vec<String>> {
    let by_cidr: BTreeMap<&str, &str> = described
        .pointer("/Subnets")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|s| Some((s["CidrBlock"].as_str()?, s["SubnetId"].as_str()?)))
                .collect()
        })
        .unwrap_or_default();

    cidrs
        .iter()
        .map(|cidr| {
            by_cidr
                .get(cidr.as_str())
                .map(|id| id.to_string())
                .ok_or_else(|| AwsError::UnexpectedResponse(format!("subnet {} is missing", cidr)))
        })
        .collect()
}

fn ids_at(value: &Value, pointer: &str, field: &str) -> Vec<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item[field].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn ingress_permissions(spec: &SecurityGroupSpec) -> Value {
    Value::Array(
        spec.ingress
            .iter()
            .map(|rule| {
                json!({
                    "IpProtocol": rule.protocol,
                    "FromPort": rule.port,
                    "ToPort": rule.port,
                    "IpRanges": [{ "CidrIp": rule.cidr, "Description": rule.description }],
                })
            })
            .collect(),
    )
}
