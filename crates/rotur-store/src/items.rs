//! Tradeable items: creation, transfer, purchase and listing.
//!
//! Purchases touch `items` and `users`; the items lock is always taken
//! first.

use rotur_shared::constants::MAX_ITEM_NAME_LEN;
use rotur_shared::types::{fold_username, now_millis, now_secs};
use rotur_shared::{Credits, ValidationError};
use serde_json::Value;
use tracing::info;

use crate::economy::{move_credits, Legs};
use crate::error::{Result, StoreError};
use crate::models::{
    EventKind, HistoryEvent, Item, Items, TransactionKind, TransferKind, TransferRecord, Users,
};
use crate::store::Store;

const PURCHASE: Legs = Legs {
    payer: TransactionKind::ItemPurchase,
    payee: TransactionKind::ItemSale,
};

fn validate_item_name(name: &str) -> std::result::Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::Empty("Item name"));
    }
    if name.len() > MAX_ITEM_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "Item name",
            max: MAX_ITEM_NAME_LEN,
        });
    }
    if !name.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
        return Err(ValidationError::Name(name.to_string()));
    }
    Ok(())
}

fn find_mut<'a>(items: &'a mut Items, name: &str) -> Result<&'a mut Item> {
    items
        .iter_mut()
        .find(|i| i.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| StoreError::not_found(format!("Item '{name}'")))
}

/// Owned item or `Forbidden`.
fn owned_mut<'a>(items: &'a mut Items, name: &str, owner: &str) -> Result<&'a mut Item> {
    let item = find_mut(items, name)?;
    if item.owner != owner {
        return Err(StoreError::forbidden("You do not own this item"));
    }
    Ok(item)
}

fn apply_purchase(items: &mut Items, users: &mut Users, name: &str, buyer: &str) -> Result<Item> {
    let item = find_mut(items, name)?;
    if !item.selling {
        return Err(StoreError::precondition("Item is not for sale"));
    }
    if item.owner == buyer {
        return Err(StoreError::precondition("You already own this item"));
    }

    move_credits(
        users,
        buyer,
        &item.owner,
        item.price,
        PURCHASE,
        Some(&item.name),
        now_millis(),
    )?;

    item.transfer_history.push(TransferRecord {
        kind: TransferKind::Purchase,
        from: item.owner.clone(),
        to: buyer.to_string(),
        price: Some(item.price),
        timestamp: now_secs(),
    });
    item.total_income = item.total_income.saturating_add(item.price);
    item.owner = buyer.to_string();
    item.selling = false;
    Ok(item.clone())
}

impl Store {
    pub async fn create_item(
        &self,
        owner: &str,
        name: &str,
        description: &str,
        price: Credits,
        private: Option<Value>,
    ) -> Result<Item> {
        let owner = self.require_active(owner).await?;
        let name = name.trim();
        validate_item_name(name)?;
        if price.is_negative() {
            return Err(StoreError::BadInput("Price must not be negative".to_string()));
        }

        let item = Item {
            name: name.to_string(),
            description: description.to_string(),
            owner: owner.clone(),
            author: owner,
            price,
            selling: false,
            created: now_millis(),
            transfer_history: Vec::new(),
            total_income: Credits::ZERO,
            private,
        };
        self.items
            .try_mutate(|items| {
                if items.iter().any(|i| i.name.eq_ignore_ascii_case(&item.name)) {
                    return Err(StoreError::Conflict(format!("Item '{}'", item.name)));
                }
                items.push(item.clone());
                Ok(item)
            })
            .await
    }

    /// Item by name, with the private payload hidden unless `viewer` owns it.
    pub async fn get_item(&self, name: &str, viewer: Option<&str>) -> Result<Item> {
        let viewer = viewer.map(fold_username);
        self.items
            .read(|items| {
                items
                    .iter()
                    .find(|i| i.name.eq_ignore_ascii_case(name))
                    .map(|i| i.view_for(viewer.as_deref()))
            })
            .await
            .ok_or_else(|| StoreError::not_found(format!("Item '{name}'")))
    }

    pub async fn items_of(&self, owner: &str, viewer: Option<&str>) -> Vec<Item> {
        let owner = fold_username(owner);
        let viewer = viewer.map(fold_username);
        self.items
            .read(|items| {
                items
                    .iter()
                    .filter(|i| i.owner == owner)
                    .map(|i| i.view_for(viewer.as_deref()))
                    .collect()
            })
            .await
    }

    pub async fn items_for_sale(&self) -> Vec<Item> {
        self.items
            .read(|items| {
                items
                    .iter()
                    .filter(|i| i.selling)
                    .map(|i| i.view_for(None))
                    .collect()
            })
            .await
    }

    /// Give an item away. Clears the selling flag.
    pub async fn transfer_item(&self, name: &str, from: &str, to: &str) -> Result<Item> {
        let from = fold_username(from);
        let to = fold_username(to);
        if from == to {
            return Err(StoreError::BadInput("Cannot transfer to yourself".to_string()));
        }
        if !self.user_exists(&to).await {
            return Err(StoreError::not_found(format!("User '{to}'")));
        }

        let item = self
            .items
            .try_mutate(|items| {
                let item = owned_mut(items, name, &from)?;
                item.transfer_history.push(TransferRecord {
                    kind: TransferKind::Transfer,
                    from: from.clone(),
                    to: to.clone(),
                    price: None,
                    timestamp: now_secs(),
                });
                item.owner = to.clone();
                item.selling = false;
                Ok(item.clone())
            })
            .await?;

        self.record_event(
            HistoryEvent::new(EventKind::ItemTransfer, &from, now_millis()).target(to),
        )
        .await;
        Ok(item)
    }

    /// Buy an item that is for sale. The price moves from the buyer to the
    /// current owner and ownership passes to the buyer.
    pub async fn buy_item(&self, name: &str, buyer: &str) -> Result<Item> {
        let buyer = self.require_active(buyer).await?;

        let result = {
            let mut items = self.items.write_guard().await;
            let mut users = self.users.write_guard().await;
            apply_purchase(&mut items, &mut users, name, &buyer)
        };
        let item = result?;
        self.items.schedule_flush();
        self.users.schedule_flush();

        info!(item = %item.name, buyer = %buyer, price = %item.price, "Item purchased");
        self.record_event(
            HistoryEvent::new(EventKind::ItemPurchase, &buyer, now_millis())
                .target(item.name.clone())
                .amount(item.price),
        )
        .await;
        Ok(item)
    }

    pub async fn set_item_price(&self, name: &str, owner: &str, price: Credits) -> Result<()> {
        if price.is_negative() {
            return Err(StoreError::BadInput("Price must not be negative".to_string()));
        }
        let owner = fold_username(owner);
        self.items
            .try_mutate(|items| {
                owned_mut(items, name, &owner)?.price = price;
                Ok(())
            })
            .await
    }

    pub async fn set_item_selling(&self, name: &str, owner: &str, selling: bool) -> Result<()> {
        let owner = fold_username(owner);
        self.items
            .try_mutate(|items| {
                owned_mut(items, name, &owner)?.selling = selling;
                Ok(())
            })
            .await
    }

    pub async fn delete_item(&self, name: &str, owner: &str) -> Result<()> {
        let owner = fold_username(owner);
        self.items
            .try_mutate(|items| {
                owned_mut(items, name, &owner)?;
                items.retain(|i| !i.name.eq_ignore_ascii_case(name));
                Ok(())
            })
            .await
    }
}
