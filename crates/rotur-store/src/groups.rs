//! Groups with roles, announcements, events and tips.
//!
//! Every group has exactly one Owner role, held by the owner only, and a
//! default Member role given to everyone who joins.

use std::collections::BTreeSet;

use rotur_shared::constants::{MAX_GROUP_TAG_LEN, MAX_POST_LEN};
use rotur_shared::types::{char_len, fold_username, now_millis};
use rotur_shared::Credits;
use tracing::info;
use uuid::Uuid;

use crate::economy::{move_credits, Legs};
use crate::error::{Result, StoreError};
use crate::models::{
    Announcement, EventKind, Group, GroupEvent, GroupMember, Groups, HistoryEvent, Permission,
    Role, RoleKind, Tip, TransactionKind, Users,
};
use crate::store::Store;

const OWNER_ROLE: &str = "owner";
const MEMBER_ROLE: &str = "member";

const TIP: Legs = Legs {
    payer: TransactionKind::Tip,
    payee: TransactionKind::Tip,
};

fn normalize_tag(tag: &str) -> Result<String> {
    let tag = tag.trim();
    if tag.is_empty()
        || tag.len() > MAX_GROUP_TAG_LEN
        || !tag.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(StoreError::BadInput(format!(
            "Group tag must be 1-{MAX_GROUP_TAG_LEN} letters or digits"
        )));
    }
    Ok(tag.to_ascii_uppercase())
}

fn group_mut<'a>(groups: &'a mut Groups, tag: &str) -> Result<&'a mut Group> {
    groups
        .get_mut(&tag.to_ascii_uppercase())
        .ok_or_else(|| StoreError::not_found(format!("Group '{tag}'")))
}

/// Group where `actor` holds `perm`, or `Forbidden`.
fn group_with_permission<'a>(
    groups: &'a mut Groups,
    tag: &str,
    actor: &str,
    perm: Permission,
) -> Result<&'a mut Group> {
    let group = group_mut(groups, tag)?;
    if !group.has_permission(actor, perm) {
        return Err(StoreError::forbidden("Missing group permission"));
    }
    Ok(group)
}

fn member(now: i64, roles: &[&str]) -> GroupMember {
    GroupMember {
        joined: now,
        roles: roles.iter().map(|r| r.to_string()).collect(),
    }
}

fn apply_tip(
    groups: &mut Groups,
    users: &mut Users,
    tag: &str,
    from: &str,
    amount: Credits,
    now: i64,
) -> Result<String> {
    let group = group_mut(groups, tag)?;
    if group.owner == from {
        return Err(StoreError::precondition("You cannot tip your own group"));
    }
    move_credits(users, from, &group.owner, amount, TIP, Some(&group.tag), now)?;
    group.tips.push(Tip {
        from: from.to_string(),
        amount,
        timestamp: now,
    });
    Ok(group.tag.clone())
}

impl Store {
    pub async fn create_group(
        &self,
        owner: &str,
        tag: &str,
        name: &str,
        description: &str,
    ) -> Result<Group> {
        let owner = self.require_active(owner).await?;
        let owner_id = self.get_user(&owner).await?.id;
        let tag = normalize_tag(tag)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::BadInput("Group name must not be empty".to_string()));
        }

        let now = now_millis();
        let group = Group {
            tag: tag.clone(),
            name: name.to_string(),
            description: description.to_string(),
            owner_id,
            owner: owner.clone(),
            created: now,
            members: [(owner, member(now, &[OWNER_ROLE, MEMBER_ROLE]))].into(),
            roles: vec![
                Role {
                    id: OWNER_ROLE.to_string(),
                    name: "Owner".to_string(),
                    kind: RoleKind::Owner,
                    permissions: BTreeSet::new(),
                },
                Role {
                    id: MEMBER_ROLE.to_string(),
                    name: "Member".to_string(),
                    kind: RoleKind::Member,
                    permissions: BTreeSet::new(),
                },
            ],
            announcements: Vec::new(),
            events: Vec::new(),
            tips: Vec::new(),
        };

        let group = self
            .groups
            .try_mutate(|groups| {
                if groups.contains_key(&tag) {
                    return Err(StoreError::Conflict(format!("Group '{tag}'")));
                }
                groups.insert(tag.clone(), group.clone());
                Ok(group)
            })
            .await?;
        info!(group = %group.tag, owner = %group.owner, "Group created");
        Ok(group)
    }

    pub async fn get_group(&self, tag: &str) -> Result<Group> {
        let tag = tag.to_ascii_uppercase();
        self.groups
            .read(|groups| groups.get(&tag).cloned())
            .await
            .ok_or_else(|| StoreError::not_found(format!("Group '{tag}'")))
    }

    /// Tags of the groups `user` belongs to.
    pub async fn groups_of(&self, user: &str) -> Vec<String> {
        let user = fold_username(user);
        self.groups
            .read(|groups| {
                groups
                    .values()
                    .filter(|g| g.members.contains_key(&user))
                    .map(|g| g.tag.clone())
                    .collect()
            })
            .await
    }

    pub async fn join_group(&self, tag: &str, user: &str) -> Result<()> {
        let user = self.require_active(user).await?;
        let now = now_millis();
        self.groups
            .try_mutate(|groups| {
                let group = group_mut(groups, tag)?;
                if group.members.contains_key(&user) {
                    return Err(StoreError::precondition("Already a member"));
                }
                group.members.insert(user, member(now, &[MEMBER_ROLE]));
                Ok(())
            })
            .await
    }

    pub async fn leave_group(&self, tag: &str, user: &str) -> Result<()> {
        let user = fold_username(user);
        self.groups
            .try_mutate(|groups| {
                let group = group_mut(groups, tag)?;
                if group.owner == user {
                    return Err(StoreError::precondition("The owner cannot leave the group"));
                }
                group
                    .members
                    .remove(&user)
                    .map(|_| ())
                    .ok_or_else(|| StoreError::precondition("Not a member"))
            })
            .await
    }

    pub async fn kick_member(&self, tag: &str, actor: &str, target: &str) -> Result<()> {
        let actor = fold_username(actor);
        let target = fold_username(target);
        self.groups
            .try_mutate(|groups| {
                let group = group_with_permission(groups, tag, &actor, Permission::Kick)?;
                if group.owner == target {
                    return Err(StoreError::forbidden("The owner cannot be kicked"));
                }
                group
                    .members
                    .remove(&target)
                    .map(|_| ())
                    .ok_or_else(|| StoreError::not_found(format!("Member '{target}'")))
            })
            .await
    }

    pub async fn create_role(
        &self,
        tag: &str,
        actor: &str,
        name: &str,
        permissions: BTreeSet<Permission>,
    ) -> Result<Role> {
        let actor = fold_username(actor);
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::BadInput("Role name must not be empty".to_string()));
        }
        let role = Role {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            kind: RoleKind::Custom,
            permissions,
        };
        self.groups
            .try_mutate(|groups| {
                let group = group_with_permission(groups, tag, &actor, Permission::ManageRoles)?;
                group.roles.push(role.clone());
                Ok(role)
            })
            .await
    }

    /// Give or take `role_id`. The Owner role never changes hands.
    pub async fn set_member_role(
        &self,
        tag: &str,
        actor: &str,
        target: &str,
        role_id: &str,
        assigned: bool,
    ) -> Result<()> {
        let actor = fold_username(actor);
        let target = fold_username(target);
        self.groups
            .try_mutate(|groups| {
                let group = group_with_permission(groups, tag, &actor, Permission::ManageRoles)?;
                let kind = group
                    .role(role_id)
                    .map(|r| r.kind)
                    .ok_or_else(|| StoreError::not_found(format!("Role '{role_id}'")))?;
                if kind == RoleKind::Owner {
                    return Err(StoreError::forbidden("The owner role cannot be reassigned"));
                }
                let member = group
                    .members
                    .get_mut(&target)
                    .ok_or_else(|| StoreError::not_found(format!("Member '{target}'")))?;
                if assigned {
                    member.roles.insert(role_id.to_string());
                } else {
                    member.roles.remove(role_id);
                }
                Ok(())
            })
            .await
    }

    pub async fn announce(&self, tag: &str, actor: &str, content: &str) -> Result<Announcement> {
        let actor = fold_username(actor);
        let content = content.trim();
        if content.is_empty() || char_len(content) > MAX_POST_LEN {
            return Err(StoreError::BadInput(format!(
                "Announcement must be 1-{MAX_POST_LEN} characters"
            )));
        }
        let announcement = Announcement {
            id: Uuid::new_v4().to_string(),
            author: actor.clone(),
            content: content.to_string(),
            timestamp: now_millis(),
        };
        self.groups
            .try_mutate(|groups| {
                let group = group_with_permission(groups, tag, &actor, Permission::Announce)?;
                group.announcements.push(announcement.clone());
                Ok(announcement)
            })
            .await
    }

    pub async fn create_group_event(
        &self,
        tag: &str,
        actor: &str,
        title: &str,
        starts_at: i64,
    ) -> Result<GroupEvent> {
        let actor = fold_username(actor);
        let title = title.trim();
        if title.is_empty() {
            return Err(StoreError::BadInput("Event title must not be empty".to_string()));
        }
        let event = GroupEvent {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            starts_at,
            created_by: actor.clone(),
        };
        self.groups
            .try_mutate(|groups| {
                let group = group_with_permission(groups, tag, &actor, Permission::ManageEvents)?;
                group.events.push(event.clone());
                Ok(event)
            })
            .await
    }

    /// Move credits from `from` to the group owner and log the tip.
    pub async fn tip_group(&self, tag: &str, from: &str, amount: Credits) -> Result<()> {
        if !amount.is_positive() {
            return Err(StoreError::BadInput("Amount must be positive".to_string()));
        }
        let from = self.require_active(from).await?;
        let now = now_millis();

        let result = {
            let mut groups = self.groups.write_guard().await;
            let mut users = self.users.write_guard().await;
            apply_tip(&mut groups, &mut users, tag, &from, amount, now)
        };
        let tag = result?;
        self.groups.schedule_flush();
        self.users.schedule_flush();

        self.record_event(
            HistoryEvent::new(EventKind::GroupTip, &from, now)
                .target(tag)
                .amount(amount),
        )
        .await;
        Ok(())
    }

    pub async fn delete_group(&self, tag: &str, actor: &str) -> Result<()> {
        let actor = fold_username(actor);
        self.groups
            .try_mutate(|groups| {
                let group = group_mut(groups, tag)?;
                if group.owner != actor {
                    return Err(StoreError::forbidden("Only the owner can delete the group"));
                }
                let key = group.tag.clone();
                groups.remove(&key);
                Ok(())
            })
            .await
    }
}
