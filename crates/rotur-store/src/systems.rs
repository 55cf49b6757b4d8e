//! Client systems users may declare at registration.

use rotur_shared::types::{fold_username, now_millis};

use crate::error::{Result, StoreError};
use crate::models::System;
use crate::store::Store;

impl Store {
    pub async fn register_system(
        &self,
        name: &str,
        owner: &str,
        designation: &str,
    ) -> Result<System> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::BadInput("System name must not be empty".to_string()));
        }
        let system = System {
            name: name.to_string(),
            owner: fold_username(owner),
            designation: designation.to_string(),
            created: now_millis(),
        };
        let folded = name.to_lowercase();
        self.systems
            .try_mutate(|systems| {
                if systems.contains_key(&folded) {
                    return Err(StoreError::Conflict(format!("System '{name}'")));
                }
                systems.insert(folded, system.clone());
                Ok(system)
            })
            .await
    }

    pub async fn list_systems(&self) -> Vec<System> {
        self.systems.read(|s| s.values().cloned().collect()).await
    }

    /// Users who declared `name` as their system.
    pub async fn system_users(&self, name: &str) -> Vec<String> {
        let folded = name.trim().to_lowercase();
        self.users
            .read(|users| {
                users
                    .values()
                    .filter(|u| u.system.as_deref() == Some(folded.as_str()))
                    .map(|u| u.username.clone())
                    .collect()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::store::test_support::*;
    use crate::StoreError;

    #[tokio::test]
    async fn test_register_and_declare() {
        let (store, _dir) = store().await;
        store.register_system("originOS", "admin", "os").await.unwrap();
        assert!(matches!(
            store.register_system("ORIGINOS", "admin", "").await,
            Err(StoreError::Conflict(_))
        ));

        store
            .register("alice", "a@x.io", PW, Some("OriginOS"))
            .await
            .unwrap();
        assert_eq!(store.list_systems().await.len(), 1);
        assert_eq!(store.system_users("originos").await, vec!["alice".to_string()]);
    }
}
