//! Grants the scheduler identity permission to invoke the service.

use std::sync::Arc;

use tracing::{error, info};

use crate::control_plane::{ResourceClient, ResourceId};
use crate::error::BindError;
use crate::reconcile::{ReconciliationResult, Reconciler};
use crate::types::ServiceAccountRef;

/// Ensures the signing identity exists and holds the invoker role.
///
/// A binding failure is fatal to the run: a job whose identity cannot invoke
/// the service would fail on every trigger.
#[derive(Debug, Clone)]
pub struct PermissionBinder {
    client: Arc<ResourceClient>,
    reconciler: Reconciler,
}

impl PermissionBinder {
    /// Create a binder over a shared client.
    #[must_use]
    pub fn new(client: Arc<ResourceClient>) -> Self {
        let reconciler = Reconciler::new(Arc::clone(&client));
        Self { client, reconciler }
    }

    /// Grant the invoker role on `service` to `account`.
    ///
    /// Adding a binding that is already present is a no-op on the control
    /// plane, so this is safe to repeat.
    pub async fn ensure_invoker_binding(
        &self,
        service: &ResourceId,
        account: &ServiceAccountRef,
    ) -> Result<(), BindError> {
        let email = account.email();
        self.client.bind_invoker_role(service, &email).await?;
        info!(service = %service.name, member = %email, "invoker role granted");
        Ok(())
    }

    /// Ensure the identity exists, then bind it.
    ///
    /// The result reports what happened to the identity; a failed binding
    /// turns it into `Failed`.
    pub async fn bind(
        &self,
        service: &ResourceId,
        account: &ServiceAccountRef,
    ) -> ReconciliationResult {
        let identity = self.reconciler.ensure_service_account(account).await;
        if identity.is_failed() {
            return identity;
        }

        match self.ensure_invoker_binding(service, account).await {
            Ok(()) => identity,
            Err(e) => {
                error!(service = %service.name, member = %account.email(), error = %e, "invoker binding failed");
                ReconciliationResult::Failed(e.into())
            }
        }
    }
}
