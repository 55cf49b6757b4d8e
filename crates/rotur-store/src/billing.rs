//! Recurring billing of subscription keys.
//!
//! One sweep walks every key under the keys write lock. For each holder:
//!
//! 1. `cancel_at` reached: evict, no charge.
//! 2. `next_billing` not reached: untouched.
//! 3. Otherwise charge the key price under the users write lock. On success
//!    `next_billing` moves forward one cycle from its previous value; on
//!    failure the holder is evicted.
//!
//! A holder is charged at most once per sweep, so a long backlog takes
//! several sweeps to catch up.

use rotur_shared::{BillingCycle, Credits};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::economy::{move_credits, Legs};
use crate::models::{EventKind, HistoryEvent, Key, TransactionKind};
use crate::store::Store;

const RENEWAL: Legs = Legs {
    payer: TransactionKind::SubscriptionCharge,
    payee: TransactionKind::SubscriptionIncome,
};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// When the sweep ran (ms).
    pub ran_at: i64,
    pub keys_scanned: usize,
    pub charged: usize,
    pub evicted_unpaid: usize,
    pub evicted_cancelled: usize,
    /// Every holding removed by this sweep.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub evicted: Vec<EvictedHolder>,
}

/// A (key, user) pair that lost access during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvictedHolder {
    pub key: String,
    pub user: String,
}

impl SweepReport {
    fn changed(&self) -> bool {
        self.charged + self.evicted_unpaid + self.evicted_cancelled > 0
    }
}

/// Billing state of one holder, for the admin view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HolderStatus {
    pub user: String,
    pub next_billing: Option<i64>,
    pub cancel_at: Option<i64>,
    pub due: bool,
}

/// Billing state of one subscription key, for the admin view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionStatus {
    pub key: String,
    pub name: String,
    pub creator: String,
    pub price: u64,
    pub cycle: BillingCycle,
    pub next_billing: Option<i64>,
    pub holders: Vec<HolderStatus>,
}

enum Outcome {
    Untouched,
    Charged,
    Unpaid,
    Cancelled,
}

fn eviction(user: &str, key_name: &str, now: i64) -> HistoryEvent {
    HistoryEvent::new(EventKind::SubscriptionEviction, user, now).target(key_name)
}

impl Store {
    /// Charge every due holder once and evict unpaid or cancelled ones.
    pub async fn run_subscription_sweep(&self, now: i64) -> SweepReport {
        let mut report = SweepReport {
            ran_at: now,
            ..Default::default()
        };
        let mut events = Vec::new();

        {
            let mut keys = self.keys.write_guard().await;
            for key in keys.values_mut() {
                let Some(cycle) = key.cycle() else {
                    continue;
                };
                report.keys_scanned += 1;

                let creator_exists = self.users.read(|u| u.contains_key(&key.creator)).await;
                if !creator_exists {
                    warn!(key = %key.name, creator = %key.creator, "Key creator missing, skipping renewals");
                    continue;
                }
                let Some(price) = key.price_credits() else {
                    warn!(key = %key.name, price = key.price, "Key price out of range, skipping renewals");
                    continue;
                };

                let holders: Vec<String> = key.users.keys().cloned().collect();
                for user in holders {
                    match self.settle_holder(key, &user, cycle, price, now).await {
                        Outcome::Untouched => {}
                        Outcome::Charged => {
                            report.charged += 1;
                            events.push(
                                HistoryEvent::new(EventKind::SubscriptionCharge, &user, now)
                                    .target(key.name.clone())
                                    .amount(price),
                            );
                        }
                        Outcome::Unpaid => {
                            report.evicted_unpaid += 1;
                            events.push(eviction(&user, &key.name, now));
                            report.evicted.push(EvictedHolder {
                                key: key.key.clone(),
                                user,
                            });
                        }
                        Outcome::Cancelled => {
                            report.evicted_cancelled += 1;
                            events.push(eviction(&user, &key.name, now));
                            report.evicted.push(EvictedHolder {
                                key: key.key.clone(),
                                user,
                            });
                        }
                    }
                }
                key.refresh_next_billing();
            }
        }

        if report.changed() {
            self.keys.schedule_flush();
            self.users.schedule_flush();
        }
        self.record_events(events).await;

        debug!(?report, "Subscription sweep finished");
        report
    }

    /// Apply one sweep step to `user`'s holding of `key`. The caller holds
    /// the keys write lock; the users lock is taken only for the charge.
    async fn settle_holder(
        &self,
        key: &mut Key,
        user: &str,
        cycle: BillingCycle,
        price: Credits,
        now: i64,
    ) -> Outcome {
        let Some(holder) = key.users.get(user) else {
            return Outcome::Untouched;
        };
        if holder.cancel_at.is_some_and(|at| now >= at) {
            key.users.remove(user);
            info!(key = %key.name, user, "Cancelled subscription ended");
            return Outcome::Cancelled;
        }

        let due = match holder.next_billing.or_else(|| cycle.advance(holder.time)) {
            Some(due) if now >= due => due,
            _ => return Outcome::Untouched,
        };

        let paid = {
            let mut users = self.users.write_guard().await;
            move_credits(&mut users, user, &key.creator, price, RENEWAL, Some(&key.name), now)
        };

        match paid {
            Ok(()) => {
                if let Some(holder) = key.users.get_mut(user) {
                    holder.next_billing = cycle.advance(due);
                }
                debug!(key = %key.name, user, price = %price, "Subscription renewed");
                Outcome::Charged
            }
            Err(e) => {
                key.users.remove(user);
                info!(key = %key.name, user, reason = %e, "Subscription holder evicted");
                Outcome::Unpaid
            }
        }
    }

    /// Billing state of every subscription key.
    pub async fn subscription_overview(&self, now: i64) -> Vec<SubscriptionStatus> {
        self.keys
            .read(|keys| {
                keys.values()
                    .filter_map(|key| {
                        let sub = key.subscription.as_ref()?;
                        Some(SubscriptionStatus {
                            key: key.key.clone(),
                            name: key.name.clone(),
                            creator: key.creator.clone(),
                            price: key.price,
                            cycle: sub.cycle,
                            next_billing: sub.next_billing,
                            holders: key
                                .users
                                .iter()
                                .map(|(user, h)| HolderStatus {
                                    user: user.clone(),
                                    next_billing: h.next_billing,
                                    cancel_at: h.cancel_at,
                                    due: h.next_billing.is_some_and(|at| now >= at)
                                        || h.cancel_at.is_some_and(|at| now >= at),
                                })
                                .collect(),
                        })
                    })
                    .collect()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::SweepReport;
    use crate::store::test_support::*;
    use chrono::{TimeZone, Utc};
    use rotur_shared::{BillingCycle, Credits, Period};

    fn at(month: u32, day: u32) -> i64 {
        Utc.with_ymd_and_hms(2025, month, day, 12, 0, 0)
            .unwrap()
            .timestamp_millis()
    }

    async fn monthly_key(store: &crate::Store) -> String {
        let cycle = BillingCycle::new(Period::Month, 1).unwrap();
        store
            .create_key("alice", "Club", 5, Some(cycle))
            .await
            .unwrap()
            .key
    }

    #[tokio::test]
    async fn test_subscription_month() {
        let (store, _dir) = store().await;
        user_with(&store, "alice", 0).await;
        user_with(&store, "bob", 12).await;
        let token = monthly_key(&store).await;

        let key = store.buy_key(&token, "bob", at(1, 15)).await.unwrap();
        assert_eq!(key.users["bob"].next_billing, Some(at(2, 15)));
        assert_eq!(credits_of(&store, "bob").await, Credits::whole(7));

        let report = store.run_subscription_sweep(at(2, 15)).await;
        assert_eq!(report.charged, 1);
        assert_eq!(credits_of(&store, "bob").await, Credits::whole(2));
        let key = store.get_key(&token).await.unwrap();
        assert_eq!(key.users["bob"].next_billing, Some(at(3, 15)));
        assert_eq!(key.subscription.unwrap().next_billing, Some(at(3, 15)));

        let report = store.run_subscription_sweep(at(3, 15)).await;
        assert_eq!(report.evicted_unpaid, 1);
        assert_eq!(
            report.evicted,
            vec![super::EvictedHolder {
                key: token.clone(),
                user: "bob".to_string(),
            }]
        );
        assert!(!store.has_access(&token, "bob").await);
        assert_eq!(credits_of(&store, "bob").await, Credits::whole(2));
        assert_eq!(credits_of(&store, "alice").await, Credits::whole(10));
    }

    #[tokio::test]
    async fn test_cancel_then_expire() {
        let (store, _dir) = store().await;
        user_with(&store, "alice", 0).await;
        user_with(&store, "bob", 20).await;
        let token = monthly_key(&store).await;

        store.buy_key(&token, "bob", at(1, 15)).await.unwrap();
        store.run_subscription_sweep(at(2, 15)).await;
        assert_eq!(store.cancel_key(&token, "bob").await.unwrap(), at(3, 15));

        let report = store.run_subscription_sweep(at(3, 1)).await;
        assert_eq!(
            report,
            SweepReport {
                ran_at: at(3, 1),
                keys_scanned: 1,
                ..Default::default()
            }
        );
        assert!(store.has_access(&token, "bob").await);

        let report = store.run_subscription_sweep(at(3, 15)).await;
        assert_eq!(report.evicted_cancelled, 1);
        assert_eq!(report.charged, 0);
        assert!(!store.has_access(&token, "bob").await);
        assert_eq!(credits_of(&store, "bob").await, Credits::whole(10));
    }

    #[tokio::test]
    async fn test_backlog_charged_once_per_sweep() {
        let (store, _dir) = store().await;
        user_with(&store, "alice", 0).await;
        user_with(&store, "bob", 100).await;
        let token = monthly_key(&store).await;
        store.buy_key(&token, "bob", at(1, 15)).await.unwrap();
        let total = store.total_credits().await;

        // Three periods overdue, one charge per sweep.
        let late = at(5, 1);
        let first = store.run_subscription_sweep(late).await;
        assert_eq!(first.charged, 1);
        let key = store.get_key(&token).await.unwrap();
        assert_eq!(key.users["bob"].next_billing, Some(at(3, 15)));

        store.run_subscription_sweep(late).await;
        let key = store.get_key(&token).await.unwrap();
        assert_eq!(key.users["bob"].next_billing, Some(at(4, 15)));
        assert_eq!(credits_of(&store, "bob").await, Credits::whole(85));
        assert_eq!(store.total_credits().await, total);
    }

    #[tokio::test]
    async fn test_evicted_holder_stays_out() {
        let (store, _dir) = store().await;
        user_with(&store, "alice", 0).await;
        user_with(&store, "bob", 5).await;
        let token = monthly_key(&store).await;
        store.buy_key(&token, "bob", at(1, 15)).await.unwrap();

        store.run_subscription_sweep(at(2, 15)).await;
        assert!(!store.has_access(&token, "bob").await);

        store.mint("bob", Credits::whole(50)).await.unwrap();
        for month in 3..=6 {
            let report = store.run_subscription_sweep(at(month, 20)).await;
            assert_eq!(report.charged, 0);
        }
        assert!(!store.has_access(&token, "bob").await);
        assert_eq!(credits_of(&store, "bob").await, Credits::whole(50));

        let overview = store.subscription_overview(at(6, 20)).await;
        assert_eq!(overview.len(), 1);
        assert!(overview[0].holders.is_empty());
        assert_eq!(overview[0].next_billing, None);
    }

    #[tokio::test]
    async fn test_out_of_range_price_is_not_billed() {
        let (store, _dir) = store().await;
        user_with(&store, "alice", 0).await;
        user_with(&store, "bob", 10).await;
        let token = monthly_key(&store).await;
        store.buy_key(&token, "bob", at(1, 15)).await.unwrap();
        store
            .keys
            .mutate(|keys| {
                if let Some(k) = keys.get_mut(&token) {
                    k.price = u64::MAX;
                }
            })
            .await;

        let report = store.run_subscription_sweep(at(2, 15)).await;
        assert_eq!(report.charged + report.evicted_unpaid, 0);
        assert_eq!(credits_of(&store, "bob").await, Credits::whole(5));
        assert_eq!(credits_of(&store, "alice").await, Credits::whole(5));
        assert!(store.has_access(&token, "bob").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sweep_races_purchases_and_transfers() {
        let (store, _dir) = store().await;
        user_with(&store, "alice", 0).await;
        let buyers: Vec<String> = (0..12).map(|i| format!("buyer{i}")).collect();
        for name in &buyers {
            user_with(&store, name, 8).await;
        }
        let token = monthly_key(&store).await;
        let total = store.total_credits().await;

        let mut handles = Vec::new();
        for (i, name) in buyers.iter().enumerate() {
            let buyer_store = store.clone();
            let token = token.clone();
            let name = name.clone();
            let peer = buyers[(i + 1) % buyers.len()].clone();
            handles.push(tokio::spawn(async move {
                let _ = buyer_store.buy_key(&token, &name, at(1, 15)).await;
                let _ = buyer_store.transfer(&name, &peer, Credits::whole(1), None).await;
            }));
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.run_subscription_sweep(at(2, 15)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.total_credits().await, total);
        let key = store.get_key(&token).await.unwrap();
        for name in &buyers {
            let credits = credits_of(&store, name).await;
            assert!(!credits.is_negative());
            if let Some(holder) = key.users.get(name.as_str()) {
                // Every holder paid for the purchase; renewals only move the date forward.
                assert!(holder.next_billing >= Some(at(2, 15)));
            }
        }
        assert!(!credits_of(&store, "alice").await.is_negative());
    }
}
