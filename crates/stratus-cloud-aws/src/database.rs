//! RDS instance with its subnet and parameter groups

use crate::awscli::{Args, AwsCli, first_at, str_at};
use crate::error::{AwsError, Result};
use crate::secrets::resolve_secret;
use crate::tags::ResourceTags;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use stratus_cloud::{Outputs, ResolvedInputs};
use stratus_core::{DatabaseSpec, RemovalPolicy, outputs};
use tracing::{info, warn};

pub async fn read_database(cli: &AwsCli, spec: &DatabaseSpec) -> Result<Option<Outputs>> {
    let Some(instance) = describe(cli, &spec.identifier).await? else {
        return Ok(None);
    };
    if instance["DBInstanceStatus"] == "deleting" {
        return Ok(None);
    }
    if instance.pointer("/Endpoint/Address").is_some() {
        return database_outputs(&instance).map(Some);
    }

    // Still creating; the endpoint appears once the instance is available
    wait(cli, "db-instance-available", &spec.identifier).await?;
    match describe(cli, &spec.identifier).await? {
        Some(instance) => database_outputs(&instance).map(Some),
        None => Ok(None),
    }
}

pub async fn create_database(
    cli: &AwsCli,
    tags: &ResourceTags,
    spec: &DatabaseSpec,
    inputs: &ResolvedInputs,
) -> Result<Outputs> {
    let subnet_ids: Vec<String> = inputs
        .plain(&spec.subnets)?
        .split(',')
        .map(str::to_string)
        .collect();
    tolerate_existing(
        cli.run(
            &Args::new("rds", "create-db-subnet-group")
                .opt("--db-subnet-group-name", subnet_group_name(spec))
                .opt(
                    "--db-subnet-group-description",
                    format!("Subnets for {}", spec.identifier),
                )
                .values("--subnet-ids", subnet_ids)
                .json("--tags", &tags.pascal()),
        )
        .await,
    )?;

    if !spec.parameters.is_empty() {
        tolerate_existing(
            cli.run(
                &Args::new("rds", "create-db-parameter-group")
                    .opt("--db-parameter-group-name", parameter_group_name(spec))
                    .opt("--db-parameter-group-family", &spec.parameter_family)
                    .opt("--description", format!("Parameters for {}", spec.identifier))
                    .json("--tags", &tags.pascal()),
            )
            .await,
        )?;
        modify_parameters(cli, spec).await?;
    }

    let password = resolve_secret(cli, inputs.secret(&spec.master_password)?).await?;
    let security_group = inputs.plain(&spec.security_group)?;
    cli.run(&create_instance_args(spec, tags, security_group, &password))
        .await?;
    info!(identifier = %spec.identifier, "Creating database instance");

    wait(cli, "db-instance-available", &spec.identifier).await?;
    let instance = describe(cli, &spec.identifier).await?.ok_or_else(|| {
        AwsError::UnexpectedResponse(format!("{} vanished after creation", spec.identifier))
    })?;
    database_outputs(&instance)
}

/// Apply the modifiable properties; engine and storage type changes require replacement
pub async fn update_database(
    cli: &AwsCli,
    spec: &DatabaseSpec,
    current: &Outputs,
) -> Result<Outputs> {
    cli.run(
        &Args::new("rds", "modify-db-instance")
            .opt("--db-instance-identifier", &spec.identifier)
            .opt("--db-instance-class", &spec.instance_class)
            .opt("--allocated-storage", spec.allocated_storage_gb.to_string())
            .opt("--backup-retention-period", spec.backup_retention_days.to_string())
            .opt_if("--preferred-backup-window", spec.backup_window.as_deref())
            .opt_if(
                "--preferred-maintenance-window",
                spec.maintenance_window.as_deref(),
            )
            .toggle("deletion-protection", spec.deletion_protection)
            .flag("--apply-immediately"),
    )
    .await?;
    if !spec.parameters.is_empty() {
        modify_parameters(cli, spec).await?;
    }
    Ok(current.clone())
}

pub async fn delete_database(cli: &AwsCli, spec: &DatabaseSpec) -> Result<()> {
    if spec.deletion_protection {
        cli.run_optional(
            &Args::new("rds", "modify-db-instance")
                .opt("--db-instance-identifier", &spec.identifier)
                .flag("--no-deletion-protection")
                .flag("--apply-immediately"),
        )
        .await?;
    }

    let args = Args::new("rds", "delete-db-instance").opt("--db-instance-identifier", &spec.identifier);
    let args = match spec.removal_policy {
        RemovalPolicy::Snapshot => args.opt(
            "--final-db-snapshot-identifier",
            final_snapshot_identifier(&spec.identifier, Utc::now()),
        ),
        RemovalPolicy::Destroy | RemovalPolicy::Retain => args.flag("--skip-final-snapshot"),
    };
    match cli.run(&args).await {
        Ok(_) => wait(cli, "db-instance-deleted", &spec.identifier).await?,
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }
    info!(identifier = %spec.identifier, "Deleted database instance");

    cli.run_optional(
        &Args::new("rds", "delete-db-subnet-group")
            .opt("--db-subnet-group-name", subnet_group_name(spec)),
    )
    .await?;
    if !spec.parameters.is_empty()
        && let Err(e) = cli
            .run_optional(
                &Args::new("rds", "delete-db-parameter-group")
                    .opt("--db-parameter-group-name", parameter_group_name(spec)),
            )
            .await
    {
        // Parameter groups can linger briefly while the instance is reaped
        warn!(error = %e, "Failed to delete parameter group");
    }
    Ok(())
}

async fn describe(cli: &AwsCli, identifier: &str) -> Result<Option<Value>> {
    let described = cli
        .run_optional(
            &Args::new("rds", "describe-db-instances").opt("--db-instance-identifier", identifier),
        )
        .await?;
    Ok(described
        .as_ref()
        .and_then(|v| first_at(v, "/DBInstances"))
        .cloned())
}

async fn wait(cli: &AwsCli, condition: &str, identifier: &str) -> Result<()> {
    cli.run(
        &Args::new("rds", "wait")
            .flag(condition)
            .opt("--db-instance-identifier", identifier),
    )
    .await?;
    Ok(())
}

async fn modify_parameters(cli: &AwsCli, spec: &DatabaseSpec) -> Result<()> {
    cli.run(
        &Args::new("rds", "modify-db-parameter-group")
            .opt("--db-parameter-group-name", parameter_group_name(spec))
            .json("--parameters", &parameters(spec)),
    )
    .await?;
    Ok(())
}

fn tolerate_existing(result: Result<Value>) -> Result<()> {
    match result {
        Ok(_) | Err(AwsError::AlreadyExists(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

fn create_instance_args(
    spec: &DatabaseSpec,
    tags: &ResourceTags,
    security_group: &str,
    password: &str,
) -> Args {
    let args = Args::new("rds", "create-db-instance")
        .opt("--db-instance-identifier", &spec.identifier)
        .opt("--engine", spec.engine.as_str())
        .opt("--engine-version", &spec.engine_version)
        .opt("--db-instance-class", &spec.instance_class)
        .opt("--allocated-storage", spec.allocated_storage_gb.to_string())
        .opt("--storage-type", &spec.storage_type)
        .toggle("storage-encrypted", spec.storage_encrypted)
        .opt("--port", spec.port.to_string())
        .opt("--db-name", &spec.database_name)
        .opt("--master-username", &spec.master_username)
        .secret("MasterUserPassword", password)
        .values("--vpc-security-group-ids", [security_group])
        .opt("--db-subnet-group-name", subnet_group_name(spec))
        .opt("--backup-retention-period", spec.backup_retention_days.to_string())
        .opt_if("--preferred-backup-window", spec.backup_window.as_deref())
        .opt_if(
            "--preferred-maintenance-window",
            spec.maintenance_window.as_deref(),
        )
        .toggle("deletion-protection", spec.deletion_protection)
        .flag("--no-publicly-accessible")
        .json("--tags", &tags.pascal());

    if spec.parameters.is_empty() {
        args
    } else {
        args.opt("--db-parameter-group-name", parameter_group_name(spec))
    }
}

fn database_outputs(instance: &Value) -> Result<Outputs> {
    let port = instance
        .pointer("/Endpoint/Port")
        .and_then(Value::as_u64)
        .ok_or_else(|| AwsError::UnexpectedResponse("missing /Endpoint/Port".to_string()))?;
    Ok(Outputs::new()
        .with_plain(outputs::ID, str_at(instance, "/DBInstanceIdentifier")?)
        .with_plain(outputs::ARN, str_at(instance, "/DBInstanceArn")?)
        .with_plain(outputs::ENDPOINT_ADDRESS, str_at(instance, "/Endpoint/Address")?)
        .with_plain(outputs::ENDPOINT_PORT, port.to_string()))
}

fn parameters(spec: &DatabaseSpec) -> Value {
    Value::Array(
        spec.parameters
            .iter()
            .map(|(name, value)| {
                json!({
                    "ParameterName": name,
                    "ParameterValue": value,
                    "ApplyMethod": "pending-reboot",
                })
            })
            .collect(),
    )
}

fn subnet_group_name(spec: &DatabaseSpec) -> String {
    format!("{}-subnets", spec.identifier)
}

fn parameter_group_name(spec: &DatabaseSpec) -> String {
    format!("{}-params", spec.identifier)
}

fn final_snapshot_identifier(identifier: &str, now: DateTime<Utc>) -> String {
    format!("{}-final-{}", identifier, now.format("%Y%m%d%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use stratus_core::{DatabaseEngine, Reference};

    fn spec() -> DatabaseSpec {
        let mut parameters = BTreeMap::new();
        parameters.insert("innodb_file_per_table".to_string(), "1".to_string());
        DatabaseSpec {
            identifier: "shop-staging-db".to_string(),
            engine: DatabaseEngine::Mysql,
            engine_version: "8.0.16".to_string(),
            database_name: "shop".to_string(),
            instance_class: "db.t3.micro".to_string(),
            allocated_storage_gb: 20,
            storage_type: "gp2".to_string(),
            storage_encrypted: true,
            port: 3306,
            master_username: "admin".to_string(),
            master_password: Reference::new("database-password", outputs::SECRET),
            security_group: Reference::new("database-sg", outputs::ID),
            subnets: Reference::new("network", outputs::SUBNET_IDS),
            backup_window: Some("01:00-02:00".to_string()),
            backup_retention_days: 7,
            maintenance_window: None,
            removal_policy: RemovalPolicy::Snapshot,
            deletion_protection: false,
            parameter_family: "mysql8.0".to_string(),
            parameters,
        }
    }

    #[test]
    fn test_create_args_hide_password() {
        let tags = ResourceTags::new("shop-staging", "database");
        let args = create_instance_args(&spec(), &tags, "sg-123", "s3cr3t-value");
        let display = args.display();

        assert!(!display.contains("s3cr3t-value"));
        assert!(!display.contains("--master-user-password"));
        assert!(display.ends_with("--cli-input-json ******"));
        assert!(display.contains("--engine mysql --engine-version 8.0.16"));
        assert!(display.contains("--storage-encrypted"));
        assert!(display.contains("--no-deletion-protection"));
        assert!(display.contains("--preferred-backup-window 01:00-02:00"));
        assert!(!display.contains("--preferred-maintenance-window"));
        assert!(display.contains("--db-parameter-group-name shop-staging-db-params"));
    }

    #[test]
    fn test_database_outputs() {
        let instance = json!({
            "DBInstanceIdentifier": "shop-staging-db",
            "DBInstanceArn": "arn:aws:rds:ap-northeast-1:123:db:shop-staging-db",
            "Endpoint": { "Address": "shop-staging-db.abc.rds.amazonaws.com", "Port": 3306 }
        });
        let read = database_outputs(&instance).unwrap();
        assert_eq!(read.plain(outputs::ENDPOINT_PORT), Some("3306"));
        assert_eq!(
            read.plain(outputs::ENDPOINT_ADDRESS),
            Some("shop-staging-db.abc.rds.amazonaws.com")
        );

        assert!(database_outputs(&json!({ "DBInstanceIdentifier": "x" })).is_err());
    }

    #[test]
    fn test_parameters_and_names() {
        let spec = spec();
        let params = parameters(&spec);
        assert_eq!(params[0]["ParameterName"], "innodb_file_per_table");
        assert_eq!(params[0]["ApplyMethod"], "pending-reboot");
        assert_eq!(subnet_group_name(&spec), "shop-staging-db-subnets");

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(
            final_snapshot_identifier(&spec.identifier, now),
            "shop-staging-db-final-20240501123000"
        );
    }
}
