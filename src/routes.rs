//! Built-in routes.

use crate::response;
use crate::router::Router;

/// Register the health endpoints.
///
/// Business routes are added by the embedding application on the same router.
pub fn register(router: &mut Router) {
    router.get("/health", |ctx| async move {
        response::ok(&serde_json::json!({
            "status": "ok",
            "service": ctx.config.app.name,
        }))
    });

    router.get("/api/health", |_ctx| async move { response::ok(&"api/health") });
}
