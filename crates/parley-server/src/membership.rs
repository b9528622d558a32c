//! Group membership lookup.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use parley_core::{GroupId, UserId};

use crate::errors::MembershipError;

/// Resolves the members of a group. Read-only from the relay's side.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GroupMembership: Send + Sync {
    /// Members of `group`. An unknown group has no members.
    async fn members_of(&self, group: GroupId) -> Result<Vec<UserId>, MembershipError>;
}

/// Fixed in-memory membership table.
#[derive(Default)]
pub struct StaticGroupMembership {
    groups: RwLock<HashMap<GroupId, BTreeSet<UserId>>>,
}

impl StaticGroupMembership {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table seeded from a settings map of group id to member ids.
    pub fn from_seed(seed: &BTreeMap<i64, Vec<i64>>) -> Self {
        let groups = seed
            .iter()
            .map(|(group, members)| {
                (
                    GroupId::new(*group),
                    members.iter().copied().map(UserId::new).collect(),
                )
            })
            .collect();
        Self {
            groups: RwLock::new(groups),
        }
    }

    /// Replace the members of `group`.
    pub fn set_members(&self, group: GroupId, members: impl IntoIterator<Item = UserId>) {
        let _ = self
            .groups
            .write()
            .insert(group, members.into_iter().collect());
    }

    /// Add one member to `group`.
    pub fn add_member(&self, group: GroupId, user: UserId) {
        let _ = self.groups.write().entry(group).or_default().insert(user);
    }

    /// Whether `user` belongs to `group`.
    pub fn contains(&self, group: GroupId, user: UserId) -> bool {
        self.groups
            .read()
            .get(&group)
            .is_some_and(|members| members.contains(&user))
    }
}

#[async_trait]
impl GroupMembership for StaticGroupMembership {
    async fn members_of(&self, group: GroupId) -> Result<Vec<UserId>, MembershipError> {
        Ok(self
            .groups
            .read()
            .get(&group)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default())
    }
}
