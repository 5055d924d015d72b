//! Stale payment-attempt maintenance.
//!
//! The CLI sweep only handles PENDING attempts: failing those is a pure
//! bookkeeping write. AUTHORIZED attempts hold provider-side state and are
//! voided by the daemon's sweep task, which owns a provider client.

use anyhow::Result;

use shop_db::payments;

pub async fn sweep(older_than_secs: i64, yes: bool) -> Result<()> {
    let pool = shop_db::connect_from_env().await?;

    if !yes {
        let stale = payments::list_stale_pending(&pool, older_than_secs).await?;
        for row in &stale {
            println!(
                "stale payment_id={} order_id={} attempt_seq={} created_at_utc={}",
                row.payment_id,
                row.order_id,
                row.attempt_seq,
                row.created_at_utc.to_rfc3339()
            );
        }
        println!("stale_pending={} dry_run=true", stale.len());
        if !stale.is_empty() {
            println!("hint=re-run with --yes to mark these attempts FAILED");
        }
        return Ok(());
    }

    let swept = payments::sweep_stale_pending(&pool, older_than_secs).await?;
    for row in &swept {
        println!(
            "swept payment_id={} order_id={} status={}",
            row.payment_id,
            row.order_id,
            row.status.as_str()
        );
    }
    println!("swept={} older_than_secs={older_than_secs}", swept.len());
    Ok(())
}
