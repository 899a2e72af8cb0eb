//! Secrets Manager
//!
//! Secret values only ever exist inside a single command round-trip: they are
//! generated, stored and resolved here, and everything else sees the ARN.

use crate::awscli::{Args, AwsCli, str_at};
use crate::error::{AwsError, Result};
use crate::tags::ResourceTags;
use stratus_cloud::{Outputs, SecretHandle, secret_outputs};
use stratus_core::SecretSpec;
use tracing::info;

pub async fn read_secret(cli: &AwsCli, spec: &SecretSpec) -> Result<Option<Outputs>> {
    let Some(described) = cli
        .run_optional(&Args::new("secretsmanager", "describe-secret").opt("--secret-id", &spec.secret_name))
        .await?
    else {
        return Ok(None);
    };
    // Scheduled for deletion counts as absent
    if !described["DeletedDate"].is_null() {
        return Ok(None);
    }
    Ok(Some(secret_outputs(SecretHandle::new(str_at(
        &described, "/ARN",
    )?))))
}

/// Generate a random value and store it, returning the secret's ARN
pub async fn generate_secret(
    cli: &AwsCli,
    tags: &ResourceTags,
    spec: &SecretSpec,
) -> Result<SecretHandle> {
    let mut random = Args::new("secretsmanager", "get-random-password")
        .opt("--password-length", spec.length.to_string());
    if !spec.exclude_characters.is_empty() {
        random = random.opt("--exclude-characters", &spec.exclude_characters);
    }
    if spec.include_space {
        random = random.flag("--include-space");
    }
    let generated = cli.run(&random).await?;
    let value = str_at(&generated, "/RandomPassword")?;

    let created = cli
        .run(
            &Args::new("secretsmanager", "create-secret")
                .opt("--name", &spec.secret_name)
                .secret("SecretString", value)
                .json("--tags", &tags.pascal()),
        )
        .await?;
    let arn = str_at(&created, "/ARN")?;
    info!(secret = %spec.secret_name, "Stored generated secret");
    Ok(SecretHandle::new(arn))
}

/// Fetch a secret value for a request that cannot take a reference
pub async fn resolve_secret(cli: &AwsCli, handle: &SecretHandle) -> Result<String> {
    let fetched = cli
        .run(&Args::new("secretsmanager", "get-secret-value").opt("--secret-id", handle.as_str()))
        .await?;
    fetched["SecretString"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AwsError::UnexpectedResponse(format!("{} has no string value", handle)))
}

pub async fn delete_secret(cli: &AwsCli, spec: &SecretSpec, recorded: &Outputs) -> Result<()> {
    let id = recorded
        .secret(stratus_core::outputs::SECRET)
        .map(SecretHandle::as_str)
        .unwrap_or(spec.secret_name.as_str());
    cli.run(
        &Args::new("secretsmanager", "delete-secret")
            .opt("--secret-id", id)
            .flag("--force-delete-without-recovery"),
    )
    .await?;
    Ok(())
}
