//! Access keys: creation, purchase, cancellation and administration.
//!
//! A purchase touches `keys` and `users`; the keys lock is always taken
//! first. Billing of subscription keys lives in [`crate::billing`].

use rotur_shared::constants::{MAX_KEY_NAME_LEN, MAX_KEY_PRICE};
use rotur_shared::types::{char_len, fold_username, generate_token, now_millis};
use rotur_shared::{BillingCycle, Credits};
use serde_json::Value;
use tracing::info;

use crate::economy::{move_credits, Legs};
use crate::error::{Result, StoreError};
use crate::models::{EventKind, HistoryEvent, Holder, Key, Keys, Subscription, TransactionKind, Users};
use crate::store::Store;

const KEY_PURCHASE: Legs = Legs {
    payer: TransactionKind::KeyPurchase,
    payee: TransactionKind::KeySale,
};

fn check_key_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::BadInput("Key name must not be empty".to_string()));
    }
    if char_len(name) > MAX_KEY_NAME_LEN {
        return Err(StoreError::BadInput(format!(
            "Key name exceeds {MAX_KEY_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn check_key_price(price: u64) -> Result<u64> {
    if price > MAX_KEY_PRICE {
        return Err(StoreError::BadInput(format!(
            "Key price exceeds {MAX_KEY_PRICE} credits"
        )));
    }
    Ok(price)
}

fn name_taken(keys: &Keys, name: &str, except: Option<&str>) -> bool {
    keys.values()
        .any(|k| Some(k.key.as_str()) != except && k.name.eq_ignore_ascii_case(name))
}

fn key_mut<'a>(keys: &'a mut Keys, token: &str) -> Result<&'a mut Key> {
    keys.get_mut(token)
        .ok_or_else(|| StoreError::not_found("Key"))
}

/// Key created by `owner`, or `Forbidden`.
fn owned_mut<'a>(keys: &'a mut Keys, token: &str, owner: &str) -> Result<&'a mut Key> {
    let key = key_mut(keys, token)?;
    if key.creator != owner {
        return Err(StoreError::forbidden("You do not own this key"));
    }
    Ok(key)
}

fn new_holder(cycle: Option<BillingCycle>, price: u64, now: i64) -> Holder {
    Holder {
        time: now,
        price,
        next_billing: cycle.and_then(|c| c.advance(now)),
        cancel_at: None,
    }
}

fn apply_purchase(
    keys: &mut Keys,
    users: &mut Users,
    token: &str,
    buyer: &str,
    now: i64,
) -> Result<(Key, Credits)> {
    let key = key_mut(keys, token)?;
    if key.creator == buyer {
        return Err(StoreError::precondition("You cannot buy your own key"));
    }
    if key.users.contains_key(buyer) {
        return Err(StoreError::precondition("You already own this key"));
    }

    let price = key
        .price_credits()
        .ok_or_else(|| StoreError::precondition("Key price is out of range"))?;
    move_credits(
        users,
        buyer,
        &key.creator,
        price,
        KEY_PURCHASE,
        Some(&key.name),
        now,
    )?;

    let holder = new_holder(key.cycle(), key.price, now);
    key.users.insert(buyer.to_string(), holder);
    key.refresh_next_billing();
    Ok((key.clone(), price))
}

impl Store {
    pub async fn create_key(
        &self,
        creator: &str,
        name: &str,
        price: u64,
        subscription: Option<BillingCycle>,
    ) -> Result<Key> {
        let creator = self.require_active(creator).await?;
        let name = check_key_name(name)?;
        let price = check_key_price(price)?;
        let key = Key {
            key: generate_token(),
            name,
            creator,
            price,
            created: now_millis(),
            subscription: subscription.map(|cycle| Subscription {
                cycle,
                next_billing: None,
            }),
            users: Default::default(),
            data: None,
        };

        let key = self
            .keys
            .try_mutate(|keys| {
                if name_taken(keys, &key.name, None) {
                    return Err(StoreError::Conflict(format!("Key '{}'", key.name)));
                }
                keys.insert(key.key.clone(), key.clone());
                Ok(key)
            })
            .await?;
        info!(key = %key.name, creator = %key.creator, "Key created");
        Ok(key)
    }

    pub async fn get_key(&self, token: &str) -> Result<Key> {
        self.keys
            .read(|keys| keys.get(token).cloned())
            .await
            .ok_or_else(|| StoreError::not_found("Key"))
    }

    /// Keys `user` created or holds.
    pub async fn keys_of(&self, user: &str) -> Vec<Key> {
        let user = fold_username(user);
        self.keys
            .read(|keys| {
                keys.values()
                    .filter(|k| k.has_access(&user))
                    .cloned()
                    .collect()
            })
            .await
    }

    pub async fn has_access(&self, token: &str, user: &str) -> bool {
        let user = fold_username(user);
        self.keys
            .read(|keys| keys.get(token).is_some_and(|k| k.has_access(&user)))
            .await
    }

    /// Buy `token` at `now`. The price goes to the creator; subscription
    /// keys schedule the first renewal one period later.
    pub async fn buy_key(&self, token: &str, buyer: &str, now: i64) -> Result<Key> {
        let buyer = self.require_active(buyer).await?;

        let result = {
            let mut keys = self.keys.write_guard().await;
            let mut users = self.users.write_guard().await;
            apply_purchase(&mut keys, &mut users, token, &buyer, now)
        };
        let (key, price) = result?;
        self.keys.schedule_flush();
        self.users.schedule_flush();

        info!(key = %key.name, buyer = %buyer, price = key.price, "Key purchased");
        self.record_event(
            HistoryEvent::new(EventKind::KeyPurchase, &buyer, now)
                .target(key.name.clone())
                .amount(price),
        )
        .await;
        Ok(key)
    }

    /// Stop renewing at the next billing date. Access continues until then.
    /// Returns the instant access ends.
    pub async fn cancel_key(&self, token: &str, user: &str) -> Result<i64> {
        let user = fold_username(user);
        let cancel_at = self
            .keys
            .try_mutate(|keys| {
                let key = key_mut(keys, token)?;
                if key.subscription.is_none() {
                    return Err(StoreError::precondition("Key is not a subscription"));
                }
                let holder = key
                    .users
                    .get_mut(&user)
                    .ok_or_else(|| StoreError::precondition("You do not hold this key"))?;
                if holder.cancel_at.is_some() {
                    return Err(StoreError::precondition("Subscription already cancelled"));
                }
                let at = holder
                    .next_billing
                    .ok_or_else(|| StoreError::precondition("No billing date scheduled"))?;
                holder.cancel_at = Some(at);
                Ok(at)
            })
            .await?;

        self.record_event(HistoryEvent::new(EventKind::KeyCancel, &user, now_millis()).target(token))
            .await;
        Ok(cancel_at)
    }

    /// The creator removes a holder.
    pub async fn revoke_key(&self, token: &str, owner: &str, holder: &str) -> Result<()> {
        let owner = fold_username(owner);
        let holder = fold_username(holder);
        self.keys
            .try_mutate(|keys| {
                let key = owned_mut(keys, token, &owner)?;
                if key.users.remove(&holder).is_none() {
                    return Err(StoreError::not_found(format!("Holder '{holder}'")));
                }
                key.refresh_next_billing();
                Ok(())
            })
            .await?;
        self.record_event(
            HistoryEvent::new(EventKind::KeyRevoke, &holder, now_millis()).target(token),
        )
        .await;
        Ok(())
    }

    pub async fn delete_key(&self, token: &str, owner: &str) -> Result<()> {
        let owner = fold_username(owner);
        self.keys
            .try_mutate(|keys| {
                owned_mut(keys, token, &owner)?;
                keys.remove(token);
                Ok(())
            })
            .await
    }

    pub async fn rename_key(&self, token: &str, owner: &str, name: &str) -> Result<()> {
        let owner = fold_username(owner);
        let name = check_key_name(name)?;
        self.keys
            .try_mutate(|keys| {
                if name_taken(keys, &name, Some(token)) {
                    return Err(StoreError::Conflict(format!("Key '{name}'")));
                }
                owned_mut(keys, token, &owner)?.name = name;
                Ok(())
            })
            .await
    }

    /// New price applies to future purchases and renewals.
    pub async fn set_key_price(&self, token: &str, owner: &str, price: u64) -> Result<()> {
        let owner = fold_username(owner);
        let price = check_key_price(price)?;
        self.keys
            .try_mutate(|keys| {
                owned_mut(keys, token, &owner)?.price = price;
                Ok(())
            })
            .await
    }

    pub async fn set_key_data(&self, token: &str, owner: &str, data: Option<Value>) -> Result<()> {
        let owner = fold_username(owner);
        self.keys
            .try_mutate(|keys| {
                owned_mut(keys, token, &owner)?.data = data;
                Ok(())
            })
            .await
    }

    /// Add a holder without payment.
    pub async fn admin_grant_key(&self, token: &str, user: &str) -> Result<()> {
        let user = fold_username(user);
        if !self.user_exists(&user).await {
            return Err(StoreError::not_found(format!("User '{user}'")));
        }
        let now = now_millis();
        self.keys
            .try_mutate(|keys| {
                let key = key_mut(keys, token)?;
                if key.has_access(&user) {
                    return Err(StoreError::precondition("User already has this key"));
                }
                let holder = new_holder(key.cycle(), 0, now);
                key.users.insert(user.clone(), holder);
                key.refresh_next_billing();
                Ok(())
            })
            .await?;
        self.record_event(HistoryEvent::new(EventKind::KeyGrant, &user, now).target(token))
            .await;
        Ok(())
    }

    pub async fn admin_remove_key(&self, token: &str, user: &str) -> Result<()> {
        let user = fold_username(user);
        self.keys
            .try_mutate(|keys| {
                let key = key_mut(keys, token)?;
                if key.users.remove(&user).is_none() {
                    return Err(StoreError::not_found(format!("Holder '{user}'")));
                }
                key.refresh_next_billing();
                Ok(())
            })
            .await?;
        self.record_event(
            HistoryEvent::new(EventKind::KeyRevoke, &user, now_millis()).target(token),
        )
        .await;
        Ok(())
    }
}
