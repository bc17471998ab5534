//! Card payments: processor adapters, the provider registry, charge
//! allocation and the orchestrator that turns pending registrations into paid
//! ones.

pub mod allocation;
pub mod error;
pub mod flow;
pub mod orchestrator;
pub mod providers;
pub mod refund;
pub mod registry;
pub mod traits;
pub mod types;
pub mod webhook;

pub use allocation::Allocation;
pub use error::{ConfigError, ProviderError, ProviderResult};
pub use flow::{Flow, LineItems, PaymentRequest, PlayerLine};
pub use orchestrator::{PaymentOrchestrator, PaymentOutcome, PaymentVerification};
pub use providers::{DefaultProviderFactory, ProviderAdapter, ProviderFactory};
pub use refund::{RefundCommand, RefundOutcome, RefundService};
pub use registry::{Operation, ProviderRegistry, ResolvedProvider};
pub use traits::PaymentProvider;
pub use webhook::{WebhookEvent, WebhookEventKind, WebhookOutcome, WebhookService};
