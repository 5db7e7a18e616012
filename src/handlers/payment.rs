use crate::entities::PurchaseStatus;
use crate::middlewares::current_customer_id;
use crate::models::ApiResponse;
use crate::services::{PaymentReconciler, PollingIngress};
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};

#[utoipa::path(
    get,
    path = "/api/v1/payments/{transaction_id}/status",
    tag = "payment",
    params(
        ("transaction_id" = String, Path, description = "结账时返回的交易号")
    ),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "当前支付状态；已支付时附带全部号码", body = crate::models::ReconcileResult),
        (status = 401, description = "未授权"),
        (status = 404, description = "购买不存在或不属于当前用户")
    )
)]
/// 查询支付状态
///
/// 网关暂时不可用时返回库中状态，客户端按自己的节奏继续轮询
pub async fn get_payment_status(
    req: HttpRequest,
    path: web::Path<String>,
    polling: web::Data<PollingIngress>,
    reconciler: web::Data<PaymentReconciler>,
) -> Result<HttpResponse> {
    let customer_id = match current_customer_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };
    let transaction_id = path.into_inner();

    match polling.poll(&reconciler, customer_id, &transaction_id).await {
        Ok(result) if result.status == PurchaseStatus::Pending => Ok(HttpResponse::Ok().json(
            ApiResponse::success_with_message(result, "Aguardando pagamento".to_string()),
        )),
        Ok(result) => Ok(HttpResponse::Ok().json(ApiResponse::success(result))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn payment_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/payments").route("/{transaction_id}/status", web::get().to(get_payment_status)),
    );
}
