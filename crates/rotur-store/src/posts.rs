//! Posts, replies, likes, pins and reposts.

use rotur_shared::constants::{MAX_EXTENDED_POST_LEN, MAX_POST_LEN, MAX_REPLY_LEN};
use rotur_shared::types::{char_len, fold_username, now_millis};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::models::{Post, Reply};
use crate::store::Store;

fn check_content(content: &str, max: usize) -> Result<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(StoreError::BadInput("Content must not be empty".to_string()));
    }
    if char_len(content) > max {
        return Err(StoreError::BadInput(format!(
            "Content exceeds {max} characters"
        )));
    }
    Ok(content.to_string())
}

impl Store {
    /// Publish a post. `extended` raises the length limit and is granted to
    /// holders of the premium key.
    pub async fn create_post(
        &self,
        author: &str,
        content: &str,
        attachment: Option<String>,
        profile_only: bool,
        extended: bool,
    ) -> Result<Post> {
        let author = self.require_active(author).await?;
        let max = if extended { MAX_EXTENDED_POST_LEN } else { MAX_POST_LEN };
        let content = check_content(content, max)?;

        let post = Post {
            id: Uuid::new_v4().to_string(),
            user: author,
            content,
            timestamp: now_millis(),
            attachment: attachment.filter(|a| !a.trim().is_empty()),
            profile_only,
            replies: Vec::new(),
            likes: Default::default(),
            pinned: false,
            is_repost: false,
            original_post: None,
        };

        self.posts.mutate(|posts| posts.push(post.clone())).await;
        debug!(post = %post.id, user = %post.user, "Post created");
        Ok(post)
    }

    pub async fn get_post(&self, id: &str) -> Result<Post> {
        self.posts
            .read(|posts| posts.iter().find(|p| p.id == id).cloned())
            .await
            .ok_or_else(|| StoreError::not_found("Post"))
    }

    pub async fn reply_to_post(&self, id: &str, author: &str, content: &str) -> Result<Reply> {
        let author = self.require_active(author).await?;
        let content = check_content(content, MAX_REPLY_LEN)?;
        let reply = Reply {
            id: Uuid::new_v4().to_string(),
            user: author,
            content,
            timestamp: now_millis(),
        };
        self.posts
            .try_mutate(|posts| {
                let post = find_mut(posts, id)?;
                post.replies.push(reply.clone());
                Ok(reply)
            })
            .await
    }

    /// Like or unlike. Returns the new like count; repeating an action is a
    /// no-op.
    pub async fn set_like(&self, id: &str, user: &str, liked: bool) -> Result<usize> {
        let user = fold_username(user);
        self.posts
            .try_mutate(|posts| {
                let post = find_mut(posts, id)?;
                if liked {
                    post.likes.insert(user);
                } else {
                    post.likes.remove(&user);
                }
                Ok(post.likes.len())
            })
            .await
    }

    /// Pin or unpin one of the caller's own posts.
    pub async fn set_pinned(&self, id: &str, user: &str, pinned: bool) -> Result<()> {
        let user = fold_username(user);
        self.posts
            .try_mutate(|posts| {
                let post = find_mut(posts, id)?;
                if post.user != user {
                    return Err(StoreError::forbidden("Only the author can pin a post"));
                }
                post.pinned = pinned;
                Ok(())
            })
            .await
    }

    /// Repost a public, original post.
    pub async fn repost(&self, id: &str, user: &str) -> Result<Post> {
        let user = self.require_active(user).await?;
        let now = now_millis();
        self.posts
            .try_mutate(|posts| {
                let original = posts
                    .iter()
                    .find(|p| p.id == id)
                    .ok_or_else(|| StoreError::not_found("Post"))?;
                if original.is_repost {
                    return Err(StoreError::precondition("Cannot repost a repost"));
                }
                if original.profile_only {
                    return Err(StoreError::precondition(
                        "Cannot repost a profile-only post",
                    ));
                }

                let repost = Post {
                    id: Uuid::new_v4().to_string(),
                    user,
                    content: original.content.clone(),
                    timestamp: now,
                    attachment: original.attachment.clone(),
                    profile_only: false,
                    replies: Vec::new(),
                    likes: Default::default(),
                    pinned: false,
                    is_repost: true,
                    original_post: Some(original.id.clone()),
                };
                posts.push(repost.clone());
                Ok(repost)
            })
            .await
    }

    /// Delete a post; only its author or an admin may.
    pub async fn delete_post(&self, id: &str, user: &str, admin: bool) -> Result<()> {
        let user = fold_username(user);
        self.posts
            .try_mutate(|posts| {
                let index = posts
                    .iter()
                    .position(|p| p.id == id)
                    .ok_or_else(|| StoreError::not_found("Post"))?;
                if !admin && posts[index].user != user {
                    return Err(StoreError::forbidden("Only the author can delete a post"));
                }
                posts.remove(index);
                Ok(())
            })
            .await
    }

    /// Public feed, newest first, profile-only posts excluded.
    pub async fn feed(&self, limit: usize, offset: usize) -> Vec<Post> {
        self.posts
            .read(|posts| {
                posts
                    .iter()
                    .rev()
                    .filter(|p| !p.profile_only)
                    .skip(offset)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .await
    }

    /// A user's profile: pinned posts first, then newest first.
    pub async fn user_posts(&self, username: &str, limit: usize) -> Vec<Post> {
        let username = fold_username(username);
        self.posts
            .read(|posts| {
                let mut own: Vec<Post> = posts
                    .iter()
                    .rev()
                    .filter(|p| p.user == username)
                    .cloned()
                    .collect();
                own.sort_by_key(|p| !p.pinned);
                own.truncate(limit);
                own
            })
            .await
    }
}

fn find_mut<'a>(posts: &'a mut [Post], id: &str) -> Result<&'a mut Post> {
    posts
        .iter_mut()
        .find(|p| p.id == id)
        .ok_or_else(|| StoreError::not_found("Post"))
}
