//! TLS server certificate management
//!
//! Certificates are imported from PEM files readable by the cluster,
//! then referenced by name. Only the description is mutable after
//! import; making a certificate the HTTPS default goes through the
//! certificate settings document.

use crate::client::paging::drain_pages;
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

/// One server certificate as returned by the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// "valid", "expired" or "expiring"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Expiration, Unix epoch seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_after: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CertificatePage {
    certificates: Vec<Certificate>,
    #[serde(default)]
    resume: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CertificateSettings {
    settings: CertificateSettingsInner,
}

#[derive(Debug, Deserialize)]
struct CertificateSettingsInner {
    #[serde(default)]
    default_https_certificate: Option<String>,
}

// =============================================================================
// Parameters
// =============================================================================

/// Desired state of one server certificate
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificateParams {
    pub name: String,
    #[serde(default)]
    pub state: ResourceState,
    /// PEM certificate path on the cluster, required for import
    pub certificate_path: Option<String>,
    /// PEM private key path on the cluster, required for import
    pub certificate_key_path: Option<String>,
    pub certificate_key_password: Option<String>,
    pub description: Option<String>,
    /// Make this the default HTTPS certificate
    pub is_default: Option<bool>,
}

// =============================================================================
// Certificate Manager
// =============================================================================

/// Reconciles one server certificate to its desired state
pub struct CertificateManager<'a> {
    client: &'a RestClient,
}

impl<'a> CertificateManager<'a> {
    pub fn new(client: &'a RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<'a> ResourceManager for CertificateManager<'a> {
    type Params = CertificateParams;
    type State = Certificate;

    async fn apply(
        &self,
        params: &CertificateParams,
        mode: CheckMode,
    ) -> Result<ApplyOutcome<Certificate>> {
        validate_certificate_params(params)?;

        let current = self.find(&params.name).await?;
        let default_id = self.default_certificate_id().await?;

        match (current, params.state) {
            (None, ResourceState::Absent) => {
                debug!(certificate = %params.name, "certificate already absent");
                Ok(ApplyOutcome::unchanged(None))
            }
            (Some(certificate), ResourceState::Absent) => {
                if default_id.as_deref() == Some(certificate.id.as_str()) {
                    return Err(Error::validation(format!(
                        "Certificate {} is the active HTTPS default and cannot be deleted",
                        params.name
                    )));
                }
                info!(certificate = %params.name, "deleting certificate");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(certificate)));
                }
                self.client
                    .delete("Deleting certificate", &certificate_path(&certificate.id))
                    .await?;
                Ok(ApplyOutcome::changed(None))
            }
            (None, ResourceState::Present) => {
                if params.certificate_path.is_none() || params.certificate_key_path.is_none() {
                    return Err(Error::validation(format!(
                        "Certificate {} requires certificate_path and certificate_key_path to be imported",
                        params.name
                    )));
                }
                info!(certificate = %params.name, "importing certificate");
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(None));
                }
                self.client
                    .post_json(
                        "Importing certificate",
                        &format!("{}/certificate/server", API_BASE),
                        &import_body(params),
                    )
                    .await?;
                let imported = self.find(&params.name).await?;
                if let Some(imported) = &imported {
                    if params.is_default == Some(true) {
                        self.set_default(&imported.id).await?;
                    }
                }
                Ok(ApplyOutcome::changed(imported))
            }
            (Some(certificate), ResourceState::Present) => {
                let is_default = default_id.as_deref() == Some(certificate.id.as_str());
                if params.is_default == Some(false) && is_default {
                    return Err(Error::validation(format!(
                        "Certificate {} cannot be unset as default; make another certificate the default instead",
                        params.name
                    )));
                }

                let delta = certificate_delta(params, &certificate);
                let make_default = params.is_default == Some(true) && !is_default;
                if delta.is_empty() && !make_default {
                    debug!(certificate = %params.name, "certificate already matches");
                    return Ok(ApplyOutcome::unchanged(Some(certificate)));
                }
                if mode.is_check() {
                    return Ok(ApplyOutcome::changed(Some(certificate)));
                }

                if !delta.is_empty() {
                    info!(certificate = %params.name, "updating certificate metadata");
                    self.client
                        .put_json(
                            "Modifying certificate",
                            &certificate_path(&certificate.id),
                            &delta.into_body(),
                        )
                        .await?;
                }
                if make_default {
                    info!(certificate = %params.name, "setting default HTTPS certificate");
                    self.set_default(&certificate.id).await?;
                }
                self.find(&params.name).await.map(ApplyOutcome::changed)
            }
        }
    }
}

impl<'a> CertificateManager<'a> {
    async fn find(&self, name: &str) -> Result<Option<Certificate>> {
        let base = format!("{}/certificate/server", API_BASE);
        let certificates: Vec<Certificate> = drain_pages(|resume| {
            let path = match &resume {
                Some(token) => format!("{}?resume={}", base, encode_segment(token)),
                None => base.clone(),
            };
            async move {
                let page: CertificatePage =
                    self.client.get_json("Listing certificates", &path).await?;
                Ok((page.certificates, page.resume))
            }
        })
        .await?;

        Ok(certificates
            .into_iter()
            .find(|certificate| certificate.name == name))
    }

    async fn default_certificate_id(&self) -> Result<Option<String>> {
        let settings: CertificateSettings = self
            .client
            .get_json(
                "Fetching certificate settings",
                &format!("{}/certificate/settings", API_BASE),
            )
            .await?;
        Ok(settings.settings.default_https_certificate)
    }

    async fn set_default(&self, id: &str) -> Result<()> {
        self.client
            .put_json(
                "Setting default certificate",
                &format!("{}/certificate/settings", API_BASE),
                &json!({ "default_https_certificate": id }),
            )
            .await
    }
}

fn certificate_path(id: &str) -> String {
    format!("{}/certificate/server/{}", API_BASE, encode_segment(id))
}

fn validate_certificate_params(params: &CertificateParams) -> Result<()> {
    validate_name("Certificate", &params.name)?;
    if params.certificate_key_path.is_some() && params.certificate_path.is_none() {
        return Err(Error::validation(
            "certificate_key_path requires certificate_path",
        ));
    }
    Ok(())
}

fn import_body(params: &CertificateParams) -> serde_json::Value {
    let mut body = json!({
        "name": params.name,
        "certificate_path": params.certificate_path,
        "certificate_key_path": params.certificate_key_path,
    });
    let object = body.as_object_mut().unwrap();
    if let Some(password) = &params.certificate_key_password {
        object.insert("certificate_key_password".into(), json!(password));
    }
    if let Some(description) = &params.description {
        object.insert("description".into(), json!(description));
    }
    body
}

fn certificate_delta(params: &CertificateParams, current: &Certificate) -> Delta {
    DeltaBuilder::new()
        .field(
            "description",
            params.description.as_ref(),
            &current.description,
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn params(name: &str) -> CertificateParams {
        CertificateParams {
            name: name.to_string(),
            state: ResourceState::Present,
            certificate_path: None,
            certificate_key_path: None,
            certificate_key_password: None,
            description: None,
            is_default: None,
        }
    }

    fn current(name: &str) -> Certificate {
        Certificate {
            id: "cert-7f3a".to_string(),
            name: name.to_string(),
            description: "web front end".to_string(),
            status: Some("valid".to_string()),
            not_after: Some(1_790_000_000),
        }
    }

    #[test]
    fn test_key_without_certificate_rejected() {
        let mut bad = params("web");
        bad.certificate_key_path = Some("/ifs/local/web.key".to_string());
        assert_matches!(
            validate_certificate_params(&bad),
            Err(Error::Validation(_))
        );
    }

    #[test]
    fn test_description_only_reimport_is_update() {
        let mut desired = params("web");
        desired.description = Some("renewed web front end".to_string());

        let delta = certificate_delta(&desired, &current("web"));
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.get("description"), Some(&json!("renewed web front end")));
    }

    #[test]
    fn test_matching_description_is_idempotent() {
        let mut desired = params("web");
        desired.description = Some("web front end".to_string());
        assert!(certificate_delta(&desired, &current("web")).is_empty());
    }

    #[test]
    fn test_import_body_shape() {
        let mut desired = params("web");
        desired.certificate_path = Some("/ifs/local/web.crt".to_string());
        desired.certificate_key_path = Some("/ifs/local/web.key".to_string());
        desired.description = Some("web front end".to_string());

        let body = import_body(&desired);
        assert_eq!(body["name"], "web");
        assert_eq!(body["certificate_path"], "/ifs/local/web.crt");
        assert!(body.get("certificate_key_password").is_none());
    }
}
