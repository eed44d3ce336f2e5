mod backfill;
mod channel;
mod email;
mod handler;
mod pipeline;
mod webhook;

pub use backfill::{BackfillReport, BackfillScanner, BackfillSettings};
pub use channel::{ChannelRegistry, DeliveryChannel, DeliveryError, Notification};
pub use email::EmailChannel;
pub use handler::NotifyJobHandler;
pub use pipeline::{
    DeliveryOutcome, DeliverySettings, NotificationPipeline, NotifyError, REASON_ALREADY_RECORDED,
    REASON_ALREADY_SENT, REASON_IN_PROGRESS,
};
pub use webhook::WebhookChannel;
