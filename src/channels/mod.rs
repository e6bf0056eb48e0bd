pub mod twilio_sms;
pub mod webhook;

pub use twilio_sms::{SmsTransport, TwilioSmsChannel, UnconfiguredSmsTransport};
pub use webhook::configure_webhook_routes;
