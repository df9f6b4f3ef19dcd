use async_trait::async_trait;
use tracing::info;

use crate::ports::{Notifier, TemplateKind};

/// Notifier that writes each notification to the log instead of sending it.
/// Used when no transport is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template: TemplateKind,
        data: &serde_json::Value,
    ) -> bool {
        info!(%to, %subject, %template, %data, "notification");
        true
    }
}
