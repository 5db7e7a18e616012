use actix_cors::Cors;

/// 店面前端轮询支付状态需要跨域；回调由网关服务端发起，不受 CORS 影响
pub fn create_cors() -> Cors {
    Cors::default()
        .allowed_origin_fn(|_, _req_head| {
            // 在生产环境中应该限制允许的域名
            true
        })
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_any_header()
        .supports_credentials()
        .max_age(3600)
}
