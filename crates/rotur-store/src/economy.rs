//! Credit movements between users.
//!
//! All balance changes go through [`move_credits`] (or [`credit`] for the
//! fountain), which runs under the caller's users write lock and never lets
//! a balance go negative.

use rotur_shared::constants::{DAY_MS, FOUNTAIN_USER};
use rotur_shared::types::{fold_username, now_millis};
use rotur_shared::Credits;
use tracing::info;

use crate::error::{Result, StoreError};
use crate::models::{EventKind, HistoryEvent, Transaction, TransactionKind, Users};
use crate::store::Store;

/// Transaction kinds written to the payer and the payee.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Legs {
    pub payer: TransactionKind,
    pub payee: TransactionKind,
}

impl Legs {
    pub const TRANSFER: Legs = Legs {
        payer: TransactionKind::Transfer,
        payee: TransactionKind::Transfer,
    };
}

/// Move `amount` from `from` to `to` inside one users critical section.
///
/// Fails without touching anything if either user is missing or the payer
/// cannot cover the amount.
pub(crate) fn move_credits(
    users: &mut Users,
    from: &str,
    to: &str,
    amount: Credits,
    legs: Legs,
    note: Option<&str>,
    now: i64,
) -> Result<()> {
    if amount.is_negative() {
        return Err(StoreError::BadInput("Amount must not be negative".to_string()));
    }
    let credited = users
        .get(to)
        .ok_or_else(|| StoreError::not_found(format!("User '{to}'")))?
        .credits
        .checked_add(amount)
        .ok_or_else(|| StoreError::precondition("Recipient balance would overflow"))?;
    let payer = users
        .get_mut(from)
        .ok_or_else(|| StoreError::not_found(format!("User '{from}'")))?;
    let remaining = payer
        .credits
        .checked_sub(amount)
        .ok_or_else(|| StoreError::precondition("Insufficient funds"))?;

    payer.credits = remaining;
    payer.push_transaction(Transaction {
        kind: legs.payer,
        counterparty: to.to_string(),
        amount: amount.negate(),
        timestamp: now,
        note: note.map(str::to_string),
    });

    if let Some(payee) = users.get_mut(to) {
        payee.credits = credited;
        payee.push_transaction(Transaction {
            kind: legs.payee,
            counterparty: from.to_string(),
            amount,
            timestamp: now,
            note: note.map(str::to_string),
        });
    }
    Ok(())
}

/// Add credits from outside the economy (daily claims, admin mint).
pub(crate) fn credit(
    users: &mut Users,
    to: &str,
    amount: Credits,
    kind: TransactionKind,
    now: i64,
) -> Result<Credits> {
    let user = users
        .get_mut(to)
        .ok_or_else(|| StoreError::not_found(format!("User '{to}'")))?;
    user.credits = user.credits.saturating_add(amount);
    user.push_transaction(Transaction {
        kind,
        counterparty: FOUNTAIN_USER.to_string(),
        amount,
        timestamp: now,
        note: None,
    });
    Ok(user.credits)
}

impl Store {
    /// Move credits between two users. Both transaction logs gain an entry
    /// with opposite signs.
    pub async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: Credits,
        note: Option<&str>,
    ) -> Result<()> {
        let from = fold_username(from);
        let to = fold_username(to);
        if from == to {
            return Err(StoreError::BadInput("Cannot transfer to yourself".to_string()));
        }
        if !amount.is_positive() {
            return Err(StoreError::BadInput("Amount must be positive".to_string()));
        }

        let now = now_millis();
        self.users
            .try_mutate(|users| move_credits(users, &from, &to, amount, Legs::TRANSFER, note, now))
            .await?;

        info!(from = %from, to = %to, amount = %amount, "Transfer completed");
        self.record_event(
            HistoryEvent::new(EventKind::Transfer, &from, now)
                .target(to)
                .amount(amount),
        )
        .await;
        Ok(())
    }

    /// Pay out the daily claim for the user's tier. One claim per 24 hours.
    pub async fn claim_daily(&self, username: &str, now: i64) -> Result<Credits> {
        let folded = fold_username(username);
        let (amount, balance) = self
            .users
            .try_mutate(|users| {
                let user = users
                    .get(&folded)
                    .ok_or_else(|| StoreError::not_found("User"))?;
                if let Some(last) = user.last_claim {
                    if now < last + DAY_MS {
                        return Err(StoreError::precondition(format!(
                            "Already claimed, next claim in {} minutes",
                            (last + DAY_MS - now + 59_999) / 60_000
                        )));
                    }
                }
                let amount = user.tier.daily_claim();
                let balance = credit(users, &folded, amount, TransactionKind::DailyClaim, now)?;
                if let Some(user) = users.get_mut(&folded) {
                    user.last_claim = Some(now);
                }
                Ok((amount, balance))
            })
            .await?;

        self.record_event(
            HistoryEvent::new(EventKind::DailyClaim, &folded, now).amount(amount),
        )
        .await;
        Ok(balance)
    }

    /// Create credits out of thin air (admin only at the HTTP layer).
    pub async fn mint(&self, username: &str, amount: Credits) -> Result<Credits> {
        if !amount.is_positive() {
            return Err(StoreError::BadInput("Amount must be positive".to_string()));
        }
        let folded = fold_username(username);
        let now = now_millis();
        let balance = self
            .users
            .try_mutate(|users| credit(users, &folded, amount, TransactionKind::Mint, now))
            .await?;
        self.record_event(HistoryEvent::new(EventKind::Mint, &folded, now).amount(amount))
            .await;
        Ok(balance)
    }

    /// Sum of every balance, used to check conservation.
    pub async fn total_credits(&self) -> Credits {
        self.users
            .read(|users| {
                users
                    .values()
                    .fold(Credits::ZERO, |acc, u| acc.saturating_add(u.credits))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::models::TransactionKind;
    use crate::store::test_support::*;
    use crate::StoreError;
    use rotur_shared::constants::DAY_MS;
    use rotur_shared::types::now_millis;
    use rotur_shared::Credits;

    #[tokio::test]
    async fn test_register_mint_transfer() {
        let (store, _dir) = store().await;
        user_with(&store, "alice", 0).await;
        user_with(&store, "bob", 0).await;
        store.mint("alice", Credits::whole(100)).await.unwrap();

        store
            .transfer("alice", "bob", Credits::from_cents(2500), Some("lunch"))
            .await
            .unwrap();

        let alice = store.get_user("alice").await.unwrap();
        let bob = store.get_user("bob").await.unwrap();
        assert_eq!(alice.credits, Credits::whole(75));
        assert_eq!(bob.credits, Credits::whole(25));

        let out = alice.transactions.last().unwrap();
        let inc = bob.transactions.last().unwrap();
        assert_eq!(out.kind, TransactionKind::Transfer);
        assert_eq!(out.amount, Credits::whole(-25));
        assert_eq!(inc.amount, Credits::whole(25));
        assert_eq!(out.counterparty, "bob");
        assert_eq!(inc.counterparty, "alice");
    }

    #[tokio::test]
    async fn test_transfer_conserves_total_and_refuses_overdraft() {
        let (store, _dir) = store().await;
        user_with(&store, "alice", 10).await;
        user_with(&store, "bob", 5).await;
        let before = store.total_credits().await;

        let err = store
            .transfer("alice", "bob", Credits::whole(11), None)
            .await;
        assert!(matches!(err, Err(StoreError::PreconditionFailed(_))));
        assert_eq!(credits_of(&store, "alice").await, Credits::whole(10));

        store
            .transfer("alice", "bob", Credits::from_cents(999), None)
            .await
            .unwrap();
        assert_eq!(store.total_credits().await, before);
        assert_eq!(credits_of(&store, "alice").await, Credits::from_cents(1));
    }

    #[tokio::test]
    async fn test_transfer_rejects_self_and_unknown() {
        let (store, _dir) = store().await;
        user_with(&store, "alice", 10).await;
        assert!(matches!(
            store.transfer("alice", "ALICE", Credits::whole(1), None).await,
            Err(StoreError::BadInput(_))
        ));
        assert!(matches!(
            store.transfer("alice", "ghost", Credits::whole(1), None).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_daily_claim_once_per_day() {
        let (store, _dir) = store().await;
        user_with(&store, "alice", 0).await;
        let now = now_millis();

        assert_eq!(store.claim_daily("alice", now).await.unwrap(), Credits::whole(1));
        assert!(matches!(
            store.claim_daily("alice", now + DAY_MS - 1).await,
            Err(StoreError::PreconditionFailed(_))
        ));
        assert_eq!(
            store.claim_daily("alice", now + DAY_MS).await.unwrap(),
            Credits::whole(2)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transfers_conserve_total() {
        let (store, _dir) = store().await;
        let names = ["alice", "bob", "carol", "dave"];
        for name in names {
            user_with(&store, name, 50).await;
        }
        let total = store.total_credits().await;

        let mut handles = Vec::new();
        for i in 0..200 {
            let store = store.clone();
            let from = names[i % 4];
            let to = names[(i * 3 + 1) % 4];
            let amount = Credits::from_cents(((i % 7) as i64 + 1) * 350);
            handles.push(tokio::spawn(async move {
                store.transfer(from, to, amount, None).await
            }));
        }
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => {}
                Err(StoreError::PreconditionFailed(m)) => assert_eq!(m, "Insufficient funds"),
                Err(e) => panic!("unexpected transfer error: {e}"),
            }
        }

        assert_eq!(store.total_credits().await, total);
        for name in names {
            assert!(!credits_of(&store, name).await.is_negative());
        }
    }
}
