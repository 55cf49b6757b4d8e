//! The follower graph: target username -> set of follower usernames.

use rotur_shared::types::fold_username;

use crate::error::{Result, StoreError};
use crate::store::Store;

impl Store {
    /// `follower` starts following `target`. Following twice is a no-op.
    pub async fn follow(&self, follower: &str, target: &str) -> Result<()> {
        let follower = fold_username(follower);
        let target = fold_username(target);
        if follower == target {
            return Err(StoreError::precondition("You cannot follow yourself"));
        }
        if !self.user_exists(&target).await {
            return Err(StoreError::not_found(format!("User '{target}'")));
        }
        self.followers
            .mutate(|followers| {
                followers.entry(target).or_default().insert(follower);
            })
            .await;
        Ok(())
    }

    pub async fn unfollow(&self, follower: &str, target: &str) -> Result<()> {
        let follower = fold_username(follower);
        let target = fold_username(target);
        self.followers
            .try_mutate(|followers| {
                let set = followers
                    .get_mut(&target)
                    .filter(|set| set.contains(&follower))
                    .ok_or_else(|| StoreError::precondition("Not following"))?;
                set.remove(&follower);
                if set.is_empty() {
                    followers.remove(&target);
                }
                Ok(())
            })
            .await
    }

    pub async fn followers_of(&self, user: &str) -> Vec<String> {
        let user = fold_username(user);
        self.followers
            .read(|followers| {
                followers
                    .get(&user)
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default()
            })
            .await
    }

    /// Users that `user` follows.
    pub async fn following(&self, user: &str) -> Vec<String> {
        let user = fold_username(user);
        self.followers
            .read(|followers| {
                followers
                    .iter()
                    .filter(|(_, set)| set.contains(&user))
                    .map(|(target, _)| target.clone())
                    .collect()
            })
            .await
    }
}
