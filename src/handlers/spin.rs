use crate::middlewares::current_customer_id;
use crate::models::ApiResponse;
use crate::services::SpinService;
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};

#[utoipa::path(
    get,
    path = "/api/v1/spins",
    tag = "spin",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "获取转盘次数成功", body = crate::models::SpinBalanceResponse),
        (status = 401, description = "未授权")
    )
)]
/// 当前用户剩余的转盘次数（从未获得过则为 0）
pub async fn get_spin_balance(
    req: HttpRequest,
    service: web::Data<SpinService>,
) -> Result<HttpResponse> {
    let customer_id = match current_customer_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };
    match service.get_balance(customer_id).await {
        Ok(data) => Ok(HttpResponse::Ok().json(ApiResponse::success(data))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn spin_config(cfg: &mut web::ServiceConfig) {
    cfg.route("/spins", web::get().to(get_spin_balance));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middlewares::AuthMiddleware;
    use crate::testing;
    use crate::utils::JwtService;
    use actix_web::{App, test};
    use serde_json::Value;

    #[actix_web::test]
    async fn test_balance_defaults_to_zero_then_accumulates() {
        let db = testing::setup_db().await;
        let jwt = JwtService::new("secret", 3600);
        let token = jwt.generate_access_token(testing::CUSTOMER_ID).unwrap();
        let app = test::init_service(
            App::new()
                .wrap(AuthMiddleware::new(jwt))
                .app_data(web::Data::new(testing::spin_service(&db)))
                .service(web::scope("/api/v1").configure(spin_config)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/v1/spins")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["balance"], 0);

        SpinService::add_spins(&db, testing::CUSTOMER_ID, 4).await.unwrap();
        SpinService::add_spins(&db, testing::CUSTOMER_ID, 2).await.unwrap();

        let req = test::TestRequest::get()
            .uri("/api/v1/spins")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["balance"], 6);
        assert_eq!(body["data"]["customer_id"], testing::CUSTOMER_ID);
    }
}
