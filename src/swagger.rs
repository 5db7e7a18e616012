use actix_web::web;
use utoipa::OpenApi;
use utoipa::{
    Modify,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::entities::PurchaseStatus;
use crate::handlers;
use crate::models::*;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        )
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::webhook::payment_webhook,
        handlers::payment::get_payment_status,
        handlers::spin::get_spin_balance,
    ),
    components(
        schemas(
            PurchaseStatus,
            ReconcileResult,
            WebhookNotification,
            SpinBalanceResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "webhook", description = "Payment provider callbacks"),
        (name = "payment", description = "Payment status polling"),
        (name = "spin", description = "Bonus roulette spins"),
    ),
    info(
        title = "Raffle Backend API",
        version = "1.0.0",
        description = "Raffle storefront payment reconciliation API",
    ),
    servers(
        (url = "/", description = "Local server")
    )
)]
pub struct ApiDoc;

pub fn swagger_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route(
        "/swagger-ui",
        web::get().to(|| async {
            actix_web::HttpResponse::Found()
                .append_header(("Location", "/swagger-ui/"))
                .finish()
        }),
    );
}
