//! Stack orchestrator (§4.2)
//!
//! Synchronous "apply a declarative template and wait" helper used for the
//! VPC, service-role, node-instance-role, and EBS CSI driver role stacks.
//! Submission is fire-and-forget; convergence is observed by polling
//! `describeStacks` every ~5s, mirroring the teacher's reconcile-by-polling
//! discipline rather than blocking on a push notification that doesn't exist.

use std::collections::HashMap;
use std::time::Duration;

use aws_sdk_cloudformation::types::{Capability, StackStatus};

use crate::aws::client::CloudClient;
use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Submits `template_body` as a stack named `name`, tolerating "already
/// exists", then polls until the stack leaves `CREATE_IN_PROGRESS`. Returns
/// the stack's output key/value pairs on `CREATE_COMPLETE`.
pub async fn apply_stack(
    client: &CloudClient,
    name: &str,
    template_body: &str,
    capabilities: &[Capability],
    params: &HashMap<String, String>,
) -> Result<HashMap<String, String>> {
    client
        .create_stack(name, template_body, capabilities, params)
        .await?;

    loop {
        let (status, outputs) = match client.describe_stack_status(name).await? {
            Some(pair) => pair,
            None => {
                return Err(Error::StackError(format!(
                    "stack {name} vanished while awaiting creation"
                )))
            }
        };

        if status == StackStatus::CreateInProgress {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }

        if status == StackStatus::CreateComplete {
            return Ok(outputs);
        }

        let reason = failure_reason(client, name).await?;
        return Err(Error::StackError(format!(
            "stack {name} ended in {status:?}: {reason}"
        )));
    }
}

/// Walks the stack's event log in order, preferring the first
/// `CREATE_FAILED` reason, falling back to the first
/// `ROLLBACK_IN_PROGRESS` reason, per §4.2.
async fn failure_reason(client: &CloudClient, name: &str) -> Result<String> {
    let events = client.describe_stack_events(name).await?;

    let create_failed = events
        .iter()
        .find(|e| e.resource_status() == Some(&aws_sdk_cloudformation::types::ResourceStatus::CreateFailed))
        .and_then(|e| e.resource_status_reason());

    if let Some(reason) = create_failed {
        return Ok(reason.to_string());
    }

    let rollback = events
        .iter()
        .find(|e| {
            e.resource_status()
                == Some(&aws_sdk_cloudformation::types::ResourceStatus::RollbackInProgress)
        })
        .and_then(|e| e.resource_status_reason());

    Ok(rollback.unwrap_or("unknown stack failure").to_string())
}

/// Deletes `primary_name`; if its describe reports "does not exist", retries
/// against `legacy_name`. Missing in both is treated as success.
pub async fn delete_stack(client: &CloudClient, primary_name: &str, legacy_name: &str) -> Result<()> {
    match client.describe_stack_status(primary_name).await? {
        Some(_) => client.delete_stack(primary_name).await,
        None => match client.describe_stack_status(legacy_name).await? {
            Some(_) => client.delete_stack(legacy_name).await,
            None => Ok(()),
        },
    }
}
