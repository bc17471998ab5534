//! HTTP surface: routes, shared state and extractors.

pub mod auth;
pub mod email;
pub mod error;
pub mod extract;
pub mod health;
pub mod payments;
pub mod registration;

use axum::routing::{get, post};
use axum::Router;
use chrono::Duration;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{JwtService, TempTokenStore};
use crate::database::store::Store;
use crate::email::{EmailContextSource, EmailDispatcher, MailTransport};
use crate::payments::{
    PaymentOrchestrator, ProviderFactory, ProviderRegistry, RefundService, WebhookService,
};
use crate::registration::RegistrationService;

pub use extract::{ApiJson, AuthParent, RequireAdmin};

/// Deployment values the HTTP layer needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub environment: String,
    pub email_from: String,
    pub frontend_url: String,
    pub attachment_root: PathBuf,
    pub temp_token_ttl: Duration,
}

pub struct AppState<S: Store> {
    pub store: Arc<S>,
    pub registry: Arc<ProviderRegistry<S>>,
    pub orchestrator: Arc<PaymentOrchestrator<S>>,
    pub refunds: Arc<RefundService<S>>,
    pub webhooks: Arc<WebhookService<S>>,
    pub registrations: Arc<RegistrationService<S>>,
    pub mailer: Arc<EmailDispatcher>,
    pub jwt: Arc<JwtService>,
    pub temp_tokens: Arc<TempTokenStore>,
    pub environment: String,
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
            orchestrator: self.orchestrator.clone(),
            refunds: self.refunds.clone(),
            webhooks: self.webhooks.clone(),
            registrations: self.registrations.clone(),
            mailer: self.mailer.clone(),
            jwt: self.jwt.clone(),
            temp_tokens: self.temp_tokens.clone(),
            environment: self.environment.clone(),
        }
    }
}

impl<S: Store> AppState<S> {
    /// Wires every service around one store.
    pub fn new(
        store: Arc<S>,
        factory: Arc<dyn ProviderFactory>,
        transport: Arc<dyn MailTransport>,
        jwt: JwtService,
        settings: ServiceSettings,
    ) -> Self {
        let source: Arc<dyn EmailContextSource> = store.clone();
        let mailer = Arc::new(EmailDispatcher::new(
            source,
            transport,
            settings.email_from,
            settings.frontend_url,
            settings.attachment_root,
        ));
        let registry = Arc::new(ProviderRegistry::new(store.clone(), factory));
        let orchestrator = Arc::new(
            PaymentOrchestrator::new(store.clone(), registry.clone()).with_mailer(mailer.clone()),
        );

        Self {
            refunds: Arc::new(RefundService::new(store.clone(), registry.clone())),
            webhooks: Arc::new(WebhookService::new(store.clone(), registry.clone())),
            registrations: Arc::new(RegistrationService::new(store.clone())),
            temp_tokens: Arc::new(TempTokenStore::new(settings.temp_token_ttl)),
            jwt: Arc::new(jwt),
            environment: settings.environment,
            store,
            registry,
            orchestrator,
            mailer,
        }
    }
}

pub fn router<S: Store>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(health::health_check::<S>))
        // Auth
        .route("/auth/resend-verification-email", post(auth::resend_verification_email::<S>))
        .route("/auth/verify-email", post(auth::verify_email::<S>))
        // Registration
        .route("/players/register", post(registration::register_player::<S>))
        .route("/register/basketball-camp", post(registration::register_camp::<S>))
        .route("/register/tournament-team", post(registration::register_tournament_team::<S>))
        .route(
            "/register/tournament-team-multiple",
            post(registration::register_tournament_teams::<S>),
        )
        .route("/teams/register-tournament", post(registration::register_tournament_teams::<S>))
        // Email
        .route("/emails/send", post(email::send_to_parents::<S>))
        // Payments
        .route("/payments/process", post(payments::process::<S>))
        .route("/payments/tryout", post(payments::tryout::<S>))
        .route("/payments/training", post(payments::training::<S>))
        .route("/payments/tournament-team", post(payments::tournament_team::<S>))
        .route("/payments/tournament-teams", post(payments::tournament_teams::<S>))
        .route("/payments/clover/process", post(payments::clover_process::<S>))
        .route("/payments/refund", post(payments::refund::<S>))
        .route("/payments/verify/:payment_id", get(payments::verify::<S>))
        .route("/payments/details/:payment_id", get(payments::details::<S>))
        .route("/payments/system", get(payments::system::<S>))
        .route("/payments/switch", post(payments::switch::<S>))
        .route("/payments/square/webhook", post(payments::square_webhook::<S>))
        .route("/payments/clover/webhook", post(payments::clover_webhook::<S>))
        .route("/payments/stripe/webhook", post(payments::stripe_webhook::<S>))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
