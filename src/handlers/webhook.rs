use crate::models::ApiResponse;
use crate::services::{PaymentReconciler, WebhookIngress};
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};

#[utoipa::path(
    post,
    path = "/webhook/payment",
    tag = "webhook",
    request_body = crate::models::WebhookNotification,
    params(
        ("X-Webhook-Token" = Option<String>, Header, description = "共享令牌 (或使用 HTTP Basic)")
    ),
    responses(
        (status = 200, description = "对账完成，返回购买状态与全部号码", body = crate::models::ReconcileResult),
        (status = 401, description = "回调认证失败"),
        (status = 404, description = "未找到对应的购买"),
        (status = 500, description = "号码生成或写入失败")
    )
)]
/// 支付网关回调
///
/// 授予号码 / 转盘次数 / 邮件的失败不会体现在状态码上，避免网关无意义地重试
pub async fn payment_webhook(
    req: HttpRequest,
    body: web::Bytes,
    ingress: web::Data<WebhookIngress>,
    reconciler: web::Data<PaymentReconciler>,
) -> Result<HttpResponse> {
    match ingress.receive(&reconciler, req.headers(), &body).await {
        Ok(result) => Ok(HttpResponse::Ok().json(ApiResponse::success(result))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn webhook_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/webhook").route("/payment", web::post().to(payment_webhook)));
}
