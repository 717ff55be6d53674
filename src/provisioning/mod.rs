//! Remote side of a deployment: hosting package, credentials, file upload,
//! post-install command and reachability checks.

mod client;
mod error;
mod hosting;
mod probe;
mod transfer;
mod types;
pub mod validate;

pub use client::{ProvisioningClient, ProvisioningSettings};
pub use error::{ProvisioningError, RemoteError};
pub use hosting::{HostingControlPlane, HttpControlPlane};
pub use probe::{HttpProbe, SiteProbe};
pub use transfer::{CommandOutput, FileTransfer, MirrorTransfer, TransferSession};
pub use types::{
    HostedSite, ProvisioningRequest, ProvisioningResult, Secret, SiteFile, SiteSpec,
    TransferCredentials, TransferProtocol,
};
