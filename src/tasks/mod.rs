//! Background scheduled tasks for the application.
//!
//! Sweeps compensate for side effects of payment confirmation that were skipped or failed
//! (confirmation email, spin grant) and send the one-off recovery email for abandoned PIX
//! checkouts. Call `spawn_all` once during startup to launch them.

use crate::config::TaskConfig;
use crate::services::{NotificationDispatcher, SpinService};
use std::time::Duration;

/// Spawn all background tasks.
///
/// Notes
/// - Each sweep is gated by a persisted marker on the purchase, so overlapping runs are safe.
/// - This function detaches tasks via `tokio::spawn`; it does not block.
pub fn spawn_all(
    config: &TaskConfig,
    notifier: NotificationDispatcher,
    spin_service: SpinService,
    grace_period_secs: i64,
) {
    let interval = Duration::from_secs(config.sweep_interval_secs.max(1));

    // 补发确认邮件
    {
        let svc = notifier.clone();
        tokio::spawn(async move {
            loop {
                match svc.sweep_confirmations().await {
                    Ok(n) if n > 0 => log::info!("Confirmation emails sent by sweep: {n}"),
                    Ok(_) => {}
                    Err(e) => log::error!("Failed to sweep confirmation emails: {e:?}"),
                }
                tokio::time::sleep(interval).await;
            }
        });
    }

    // 补发转盘次数
    {
        let svc = spin_service.clone();
        tokio::spawn(async move {
            loop {
                match svc.sweep_ungranted(grace_period_secs).await {
                    Ok(n) if n > 0 => log::info!("Spin entitlements granted by sweep: {n}"),
                    Ok(_) => {}
                    Err(e) => log::error!("Failed to sweep spin entitlements: {e:?}"),
                }
                tokio::time::sleep(interval).await;
            }
        });
    }

    // 待支付提醒
    {
        let svc = notifier;
        tokio::spawn(async move {
            loop {
                match svc.sweep_recoveries().await {
                    Ok(n) if n > 0 => log::info!("Recovery emails sent: {n}"),
                    Ok(_) => {}
                    Err(e) => log::error!("Failed to sweep recovery emails: {e:?}"),
                }
                tokio::time::sleep(interval).await;
            }
        });
    }
}
