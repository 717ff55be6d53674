use std::fmt;

use serde::{Deserialize, Serialize};

/// One file of a rendered blueprint, relative to the site root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteFile {
    pub path: String,
    pub contents: String,
}

/// Everything needed to put a site on the hosting platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningRequest {
    /// Public hostname of the site.
    pub domain: String,
    pub blueprint_id: String,
    pub client_id: String,
    pub client_slug: String,
    pub html_content: String,
    /// Rendered manifest, written with overwrite semantics.
    #[serde(default)]
    pub files: Vec<SiteFile>,
    /// Shell command run in the site root after the files are in place.
    #[serde(default)]
    pub post_install: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningResult {
    pub success: bool,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<TransferCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Secret that never shows up in `Debug` or log output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferProtocol {
    Sftp,
    Ssh,
}

/// Access to a site's files, as handed out by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferCredentials {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub secret: Secret,
    pub protocol: TransferProtocol,
    /// Document root on the remote host.
    #[serde(default = "default_root")]
    pub root: String,
}

fn default_port() -> u16 {
    22
}

fn default_root() -> String {
    "public_html".to_string()
}

/// What we ask the control plane for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSpec {
    pub domain: String,
    pub client_id: String,
    pub client_slug: String,
    pub blueprint_id: String,
}

/// A hosting package/account as known to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostedSite {
    pub id: String,
    pub domain: String,
    pub client_slug: String,
    /// `false` when an existing package was reused.
    #[serde(default)]
    pub created: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_redacted_in_debug() {
        let creds = TransferCredentials {
            host: "ssh.host.example".into(),
            port: 22,
            user: "acme".into(),
            secret: Secret::new("hunter2"),
            protocol: TransferProtocol::Sftp,
            root: "public_html".into(),
        };
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("Secret(***)"));
    }

    #[test]
    fn credentials_defaults_from_control_plane_json() {
        let json = r#"{"host":"h.example","user":"u","secret":"s","protocol":"sftp"}"#;
        let creds: TransferCredentials = serde_json::from_str(json).unwrap();
        assert_eq!(creds.port, 22);
        assert_eq!(creds.root, "public_html");
        assert_eq!(creds.secret.expose(), "s");
    }

    #[test]
    fn result_omits_empty_optionals() {
        let result = ProvisioningResult {
            success: true,
            url: "https://acme.demo.localtest.me".into(),
            credentials: None,
            error: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(json, r#"{"success":true,"url":"https://acme.demo.localtest.me"}"#);
    }
}
