pub mod stripe;

pub use stripe::{parse_event, verify_signature, StripeClient, WebhookEvent};
