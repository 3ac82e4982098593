//! Alert channel management
//!
//! SMTP alert channels deliver cluster event notifications. The SMTP
//! password is write-only on the wire and never participates in the
//! diff.

use crate::client::{encode_segment, RestClient};
use crate::error::{Error, Result};
use crate::reconcile::{Delta, DeltaBuilder};
use crate::resources::{ResourceManager, validate_name, API_BASE};
use crate::types::{ApplyOutcome, CheckMode, ResourceState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

// =============================================================================
// Wire Types
// =============================================================================

/// SMTP delivery settings of a channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmtpParameters {
    /// Recipient addresses
    #[serde(default)]
    pub address: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_as: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_port: Option<u32>,
    #[serde(default)]
    pub smtp_use_auth: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_username: Option<String>,
}

/// One alert channel as returned by the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertChannel {
    pub name: String,
    /// Delivery mechanism; only "smtp" is managed here
    #[serde(rename = "type")]
    pub channel_type: String,
    pub enabled: bool,
    #[serde(default)]
    pub parameters: SmtpParameters,
}

#[derive(Debug, Deserialize)]
struct ChannelEnvelope {
    channels: Vec<AlertChannel>,
}

// =============================================================================
// Parameters
// =============================================================================

/// Desired state of one SMTP alert channel
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertChannelParams {
    pub name: String,
    #[serde(default)]
    pub state: ResourceState,
    pub enabled: Option<bool>,
    pub address: Option<Vec<String>>,
    pub send_as: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u32>,
    pub smtp_use_auth: Option<bool>,
    pub smtp_username: Option<String>,
    /// Write-only; sent on create or when explicitly set, never diffed
    pub smtp_password: Option<String>,
}

// =============================================================================
// Alert Channel Manager
// =============================================================================

/// Reconciles one alert channel to its desired state
pub struct AlertChannelManager<'a> {
    client: &'a RestClient,
}

impl<'a> AlertChannelManager<'a> {
    pub fn new(client: &'a RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<'a> ResourceManager for AlertChannelManager<'a> {
    type Params = AlertChannelParams;
    type State = AlertChannel;

    async fn apply(
        &self,
        params: &AlertChannelParams,
        mode: CheckMode,
    ) -> Result<ApplyOutcome<AlertChannel>> {
        validate_channel_params(params)?;

        let path = format!(
            "{}/event/channels/{}",
            API_BASE,
            encode_segment(&params.name)
        );
        let current = self
            .client
            .lookup::<ChannelEnvelope>("Fetching alert channel", &path)
            .await?
            .found()
            .and_then(|envelope| envelope.channels.into_iter().next());

        match (current, params.state) {
            (None, ResourceState::Absent) => {
                debug!(channel = %params.name, "channel already absent");
                Ok(ApplyOutcome::unchanged(None))
            }
            (Some(channel), ResourceState::Absent) => {
                info!(channel = %params.name, "deleting alert channel");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(channel)));
                }
                self.client.delete("Deleting alert channel", &path).await?;
                Ok(ApplyOutcome::changed(None))
            }
            (None, ResourceState::Present) => {
                info!(channel = %params.name, "creating alert channel");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(None));
                }
                self.client
                    .post_json(
                        "Creating alert channel",
                        &format!("{}/event/channels", API_BASE),
                        &channel_create_body(params),
                    )
                    .await?;
                self.refetch(&path).await.map(ApplyOutcome::changed)
            }
            (Some(channel), ResourceState::Present) => {
                let delta = channel_delta(params, &channel);
                if delta.is_empty() {
                    debug!(channel = %params.name, "channel already matches");
                    return Ok(ApplyOutcome::unchanged(Some(channel)));
                }
                info!(
                    channel = %params.name,
                    fields = %delta.field_names().collect::<Vec<_>>().join(","),
                    "modifying alert channel"
                );
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(channel)));
                }
                self.client
                    .put_json("Modifying alert channel", &path, &delta.into_body())
                    .await?;
                self.refetch(&path).await.map(ApplyOutcome::changed)
            }
        }
    }
}

impl<'a> AlertChannelManager<'a> {
    async fn refetch(&self, path: &str) -> Result<Option<AlertChannel>> {
        let envelope: ChannelEnvelope = self
            .client
            .get_json("Fetching alert channel", path)
            .await?;
        Ok(envelope.channels.into_iter().next())
    }
}

fn validate_channel_params(params: &AlertChannelParams) -> Result<()> {
    validate_name("Alert channel", &params.name)?;

    if (params.smtp_username.is_some() || params.smtp_password.is_some())
        && params.smtp_use_auth != Some(true)
    {
        return Err(Error::validation(
            "SMTP credentials require smtp_use_auth to be enabled",
        ));
    }
    if let Some(addresses) = &params.address {
        for address in addresses {
            if !address.contains('@') {
                return Err(Error::validation(format!(
                    "Invalid recipient address: {}",
                    address
                )));
            }
        }
    }
    Ok(())
}

fn smtp_parameters_body(params: &AlertChannelParams) -> serde_json::Map<String, serde_json::Value> {
    let mut parameters = serde_json::Map::new();
    if let Some(address) = &params.address {
        parameters.insert("address".into(), json!(address));
    }
    if let Some(send_as) = &params.send_as {
        parameters.insert("send_as".into(), json!(send_as));
    }
    if let Some(host) = &params.smtp_host {
        parameters.insert("smtp_host".into(), json!(host));
    }
    if let Some(port) = params.smtp_port {
        parameters.insert("smtp_port".into(), json!(port));
    }
    if let Some(use_auth) = params.smtp_use_auth {
        parameters.insert("smtp_use_auth".into(), json!(use_auth));
    }
    if let Some(username) = &params.smtp_username {
        parameters.insert("smtp_username".into(), json!(username));
    }
    if let Some(password) = &params.smtp_password {
        parameters.insert("smtp_password".into(), json!(password));
    }
    parameters
}

fn channel_create_body(params: &AlertChannelParams) -> serde_json::Value {
    json!({
        "name": params.name,
        "type": "smtp",
        "enabled": params.enabled.unwrap_or(true),
        "parameters": smtp_parameters_body(params),
    })
}

fn channel_delta(params: &AlertChannelParams, current: &AlertChannel) -> Delta {
    let mut builder =
        DeltaBuilder::new().field("enabled", params.enabled.as_ref(), &current.enabled);

    let parameters = DeltaBuilder::new()
        .field_set(
            "address",
            params.address.as_ref(),
            &current.parameters.address,
        )
        .field_opt(
            "send_as",
            params.send_as.as_ref(),
            current.parameters.send_as.as_ref(),
        )
        .field_opt(
            "smtp_host",
            params.smtp_host.as_ref(),
            current.parameters.smtp_host.as_ref(),
        )
        .field_opt(
            "smtp_port",
            params.smtp_port.as_ref(),
            current.parameters.smtp_port.as_ref(),
        )
        .field(
            "smtp_use_auth",
            params.smtp_use_auth.as_ref(),
            &current.parameters.smtp_use_auth,
        )
        .field_opt(
            "smtp_username",
            params.smtp_username.as_ref(),
            current.parameters.smtp_username.as_ref(),
        )
        .build();
    if !parameters.is_empty() {
        builder = builder.insert("parameters", parameters.into_body());
    }

    builder.build()
}
