//! Decides which category exchanges hear about a new service request.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::{
    directory::{Directory, ServiceRecords},
    error::{NotifyError, Result},
    models::{category::Category, message::NotificationType, service::ServiceSnapshot},
    publisher::Publisher,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub service_id: String,
    pub categories: Vec<Category>,
    pub exchanges: Vec<String>,
    /// Providers the directory matched. `None` for wildcard fan-out.
    pub matched_providers: Option<usize>,
}

pub struct DispatchPolicy {
    directory: Arc<dyn Directory>,
    publisher: Publisher,
    records: Option<Arc<dyn ServiceRecords>>,
}

impl DispatchPolicy {
    pub fn new(directory: Arc<dyn Directory>, publisher: Publisher) -> Self {
        Self {
            directory,
            publisher,
            records: None,
        }
    }

    pub fn with_records(mut self, records: Arc<dyn ServiceRecords>) -> Self {
        self.records = Some(records);
        self
    }

    /// One `NEW_SERVICE_REQUEST` broadcast per category touched: the service's
    /// category, or every known category for the wildcard.
    ///
    /// Every category is attempted; the first publish failure is returned after
    /// the rest have been tried.
    pub async fn notify_providers_of_new_service(
        &self,
        service: &ServiceSnapshot,
    ) -> Result<DispatchReport> {
        let category = service
            .routing_category()
            .ok_or_else(|| NotifyError::MissingCategory {
                service_id: service.id.clone(),
            })?;

        let known = self.directory.list_known_categories().await?;

        let (targets, matched_providers) = if category.is_wildcard() {
            (known, None)
        } else {
            if !known.contains(&category) {
                return Err(NotifyError::UnknownCategory(category.to_string()));
            }

            let matched = self
                .directory
                .resolve_providers_for_category(&category)
                .await?
                .provider_count();
            (vec![category.clone()], matched)
        };

        let payload = service.to_payload()?;
        let mut exchanges = Vec::with_capacity(targets.len());
        let mut first_error = None;

        for target in &targets {
            match self
                .publisher
                .broadcast(target, NotificationType::NewServiceRequest, payload.clone())
                .await
            {
                Ok(_) => exchanges.push(target.exchange_name()),
                Err(e) => {
                    error!(
                        service_id = %service.id,
                        category = %target,
                        exchange = %target.exchange_name(),
                        error = %e,
                        "Failed to broadcast new service request"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            service_id = %service.id,
            category = %category,
            broadcasts = exchanges.len(),
            matched_providers = ?matched_providers,
            "Providers notified of new service"
        );

        Ok(DispatchReport {
            service_id: service.id.clone(),
            categories: targets,
            exchanges,
            matched_providers,
        })
    }

    /// Dispatch for the service-creation path. Notification is best-effort:
    /// failures are logged with enough context to replay and never returned.
    pub async fn notify_providers_best_effort(
        &self,
        service: &ServiceSnapshot,
    ) -> Option<DispatchReport> {
        match self.notify_providers_of_new_service(service).await {
            Ok(report) => Some(report),
            Err(e @ NotifyError::UnknownCategory(_)) | Err(e @ NotifyError::MissingCategory { .. }) => {
                warn!(
                    service_id = %service.id,
                    categories = ?service.service_categories,
                    error = %e,
                    "Skipping provider notification for service"
                );
                None
            }
            Err(e) => {
                error!(
                    service_id = %service.id,
                    categories = ?service.service_categories,
                    error = %e,
                    "Provider notification failed, replay with `notification_publisher replay`"
                );
                None
            }
        }
    }

    /// Re-runs dispatch for a persisted service.
    pub async fn replay_service(&self, service_id: &str) -> Result<DispatchReport> {
        let records = self.records.as_ref().ok_or_else(|| {
            NotifyError::Configuration("no service record store configured".to_string())
        })?;

        let service = records
            .fetch_service(service_id)
            .await?
            .ok_or_else(|| NotifyError::Directory(format!("service {} not found", service_id)))?;

        info!(service_id, "Replaying provider notification");

        self.notify_providers_of_new_service(&service).await
    }
}
