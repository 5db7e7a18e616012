use crate::config::EntitlementConfig;

/// 乘积向下取整前的容差: 配置里的十进制比例无法精确表示为 f64
pub const RATIO_TOLERANCE: f64 = 1e-9;

/// 根据购买数量或结账时写入的覆盖值计算赠送的转盘次数
#[derive(Clone, Debug)]
pub struct EntitlementCalculator {
    config: EntitlementConfig,
}

impl EntitlementCalculator {
    pub fn new(config: EntitlementConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// 纯函数:
    /// - 有覆盖值: 向下取整后原样返回 (负数按 0)
    /// - 否则: floor(quantity * ratio + RATIO_TOLERANCE)，且不低于 minimum
    pub fn calculate(&self, quantity: i64, override_spins: Option<f64>) -> i64 {
        if let Some(value) = override_spins {
            if !value.is_finite() {
                return 0;
            }
            return value.floor().max(0.0) as i64;
        }

        let quantity = quantity.max(0) as f64;
        // 0.29 * 100 = 28.999999999999996
        let derived = (quantity * self.config.ratio + RATIO_TOLERANCE).floor() as i64;
        derived.max(self.config.minimum).max(0)
    }
}
