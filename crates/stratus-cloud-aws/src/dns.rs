//! Route 53 hosted zone and alias records

use crate::awscli::{Args, AwsCli, first_at, str_at};
use crate::error::{AwsError, Result};
use serde_json::{Value, json};
use stratus_cloud::{Outputs, ResolvedInputs};
use stratus_core::{DnsRecordSpec, DnsZoneSpec, outputs};
use tracing::info;

const TARGET_DNS_NAME: &str = "target_dns_name";
const TARGET_ZONE_ID: &str = "target_zone_id";

pub async fn read_zone(cli: &AwsCli, spec: &DnsZoneSpec) -> Result<Option<Outputs>> {
    let listed = cli
        .run(
            &Args::new("route53", "list-hosted-zones-by-name")
                .opt("--dns-name", &spec.domain_name)
                .opt("--max-items", "1"),
        )
        .await?;
    let Some(zone) = first_at(&listed, "/HostedZones") else {
        return Ok(None);
    };
    if str_at(zone, "/Name")? != fully_qualified(&spec.domain_name) {
        return Ok(None);
    }

    let zone_id = strip_zone_prefix(str_at(zone, "/Id")?);
    let detail = cli
        .run(&Args::new("route53", "get-hosted-zone").opt("--id", zone_id))
        .await?;
    Ok(Some(zone_outputs(zone_id, &detail)))
}

pub async fn create_zone(cli: &AwsCli, node: &str, spec: &DnsZoneSpec) -> Result<Outputs> {
    // Caller references must be unique per request
    let caller_reference = format!("{}-{}", node, chrono::Utc::now().timestamp_millis());
    let created = cli
        .run(
            &Args::new("route53", "create-hosted-zone")
                .opt("--name", &spec.domain_name)
                .opt("--caller-reference", caller_reference),
        )
        .await?;
    let zone_id = strip_zone_prefix(str_at(&created, "/HostedZone/Id")?);
    info!(zone_id, domain = %spec.domain_name, "Created hosted zone");
    Ok(zone_outputs(zone_id, &created))
}

pub async fn delete_zone(cli: &AwsCli, recorded: &Outputs) -> Result<()> {
    let zone_id = recorded
        .plain(outputs::ZONE_ID)
        .ok_or_else(|| AwsError::UnexpectedResponse("zone has no recorded id".to_string()))?;
    cli.run(&Args::new("route53", "delete-hosted-zone").opt("--id", zone_id))
        .await?;
    Ok(())
}

pub async fn read_record(
    cli: &AwsCli,
    spec: &DnsRecordSpec,
    recorded: Option<&Outputs>,
) -> Result<Option<Outputs>> {
    // Without a recorded zone there is nothing to look up; creation is an upsert
    let Some(recorded) = recorded else {
        return Ok(None);
    };
    let Some(zone_id) = recorded.plain(outputs::ZONE_ID) else {
        return Ok(None);
    };

    let listed = cli
        .run_optional(
            &Args::new("route53", "list-resource-record-sets")
                .opt("--hosted-zone-id", zone_id)
                .opt("--start-record-name", &spec.record_name)
                .opt("--start-record-type", "A")
                .opt("--max-items", "1"),
        )
        .await?;
    let exists = listed
        .as_ref()
        .and_then(|v| first_at(v, "/ResourceRecordSets"))
        .is_some_and(|r| {
            r["Name"].as_str() == Some(fully_qualified(&spec.record_name).as_str())
                && r["Type"] == "A"
        });
    Ok(exists.then(|| recorded.clone()))
}

/// Create or update the alias record
pub async fn upsert_record(
    cli: &AwsCli,
    spec: &DnsRecordSpec,
    inputs: &ResolvedInputs,
) -> Result<Outputs> {
    let zone_id = inputs.plain(&spec.zone)?;
    let target_dns_name = inputs.plain(&spec.target_dns_name)?;
    let target_zone_id = inputs.plain(&spec.target_zone_id)?;

    change_record(
        cli,
        zone_id,
        &alias_change("UPSERT", &spec.record_name, target_dns_name, target_zone_id),
    )
    .await?;
    info!(record = %spec.record_name, "Upserted alias record");

    Ok(Outputs::new()
        .with_plain(outputs::FQDN, &spec.record_name)
        .with_plain(outputs::ZONE_ID, zone_id)
        .with_plain(TARGET_DNS_NAME, target_dns_name)
        .with_plain(TARGET_ZONE_ID, target_zone_id))
}

pub async fn delete_record(cli: &AwsCli, spec: &DnsRecordSpec, recorded: &Outputs) -> Result<()> {
    let field = |key: &str| {
        recorded.plain(key).ok_or_else(|| {
            AwsError::UnexpectedResponse(format!("record has no recorded {}", key))
        })
    };
    let change = alias_change(
        "DELETE",
        &spec.record_name,
        field(TARGET_DNS_NAME)?,
        field(TARGET_ZONE_ID)?,
    );
    match change_record(cli, field(outputs::ZONE_ID)?, &change).await {
        // Deleting a record that is already gone
        Err(AwsError::CommandFailed { message, .. }) if message.contains("not found") => Ok(()),
        other => other,
    }
}

async fn change_record(cli: &AwsCli, zone_id: &str, change: &Value) -> Result<()> {
    let submitted = cli
        .run(
            &Args::new("route53", "change-resource-record-sets")
                .opt("--hosted-zone-id", zone_id)
                .json("--change-batch", change),
        )
        .await?;
    let change_id = str_at(&submitted, "/ChangeInfo/Id")?;
    cli.run(
        &Args::new("route53", "wait")
            .flag("resource-record-sets-changed")
            .opt("--id", change_id),
    )
    .await?;
    Ok(())
}

fn alias_change(action: &str, name: &str, target_dns_name: &str, target_zone_id: &str) -> Value {
    json!({
        "Changes": [{
            "Action": action,
            "ResourceRecordSet": {
                "Name": name,
                "Type": "A",
                "AliasTarget": {
                    "HostedZoneId": target_zone_id,
                    "DNSName": target_dns_name,
                    "EvaluateTargetHealth": false
                }
            }
        }]
    })
}

fn zone_outputs(zone_id: &str, detail: &Value) -> Outputs {
    let name_servers: Vec<&str> = detail
        .pointer("/DelegationSet/NameServers")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    Outputs::new()
        .with_plain(outputs::ZONE_ID, zone_id)
        .with_plain(outputs::NAME_SERVERS, name_servers.join(","))
}

fn strip_zone_prefix(id: &str) -> &str {
    id.trim_start_matches("/hostedzone/")
}

fn fully_qualified(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}
