//! History key naming.

use std::fmt;

use crate::ids::{GroupId, UserId};

/// Names one ordered history log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HistoryKey {
    /// One-to-one conversation. `low <= high` always holds, so both
    /// directions of a conversation share one key.
    Direct {
        /// Smaller participant id.
        low: UserId,
        /// Larger participant id.
        high: UserId,
    },
    /// Group conversation.
    Group(GroupId),
    /// A user's conversation with the assistant.
    Assistant(UserId),
}

/// Retention class; each class has its own TTL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TtlClass {
    /// Direct-chat keys.
    Direct,
    /// Group keys.
    Group,
    /// Assistant-conversation keys.
    Assistant,
}

impl HistoryKey {
    /// Key for the conversation between `a` and `b`, in either order.
    #[must_use]
    pub fn direct(a: UserId, b: UserId) -> Self {
        Self::Direct {
            low: a.min(b),
            high: a.max(b),
        }
    }

    /// Key for a group conversation.
    #[must_use]
    pub const fn group(group: GroupId) -> Self {
        Self::Group(group)
    }

    /// Key for a user's assistant conversation.
    #[must_use]
    pub const fn assistant(user: UserId) -> Self {
        Self::Assistant(user)
    }

    /// Retention class of this key.
    #[must_use]
    pub const fn ttl_class(&self) -> TtlClass {
        match self {
            Self::Direct { .. } => TtlClass::Direct,
            Self::Group(_) => TtlClass::Group,
            Self::Assistant(_) => TtlClass::Assistant,
        }
    }

    /// Whether `user` is a direct participant of this key.
    ///
    /// Group membership is resolved elsewhere; this returns `false` for groups.
    #[must_use]
    pub fn involves(&self, user: UserId) -> bool {
        match *self {
            Self::Direct { low, high } => user == low || user == high,
            Self::Assistant(owner) => user == owner,
            Self::Group(_) => false,
        }
    }
}

impl fmt::Display for HistoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { low, high } => write!(f, "msg_{low}_{high}"),
            Self::Group(group) => write!(f, "group_msg_{group}"),
            Self::Assistant(user) => write!(f, "ai_chat_{user}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_key_is_order_independent() {
        let a = HistoryKey::direct(UserId::new(7), UserId::new(5));
        let b = HistoryKey::direct(UserId::new(5), UserId::new(7));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "msg_5_7");
    }

    #[test]
    fn key_shapes() {
        assert_eq!(HistoryKey::group(GroupId::new(12)).to_string(), "group_msg_12");
        assert_eq!(HistoryKey::assistant(UserId::new(3)).to_string(), "ai_chat_3");
    }

    #[test]
    fn ttl_classes() {
        assert_eq!(
            HistoryKey::direct(UserId::new(1), UserId::new(2)).ttl_class(),
            TtlClass::Direct
        );
        assert_eq!(HistoryKey::group(GroupId::new(1)).ttl_class(), TtlClass::Group);
        assert_eq!(
            HistoryKey::assistant(UserId::new(1)).ttl_class(),
            TtlClass::Assistant
        );
    }

    #[test]
    fn involves_direct_participants_only() {
        let key = HistoryKey::direct(UserId::new(1), UserId::new(2));
        assert!(key.involves(UserId::new(1)));
        assert!(key.involves(UserId::new(2)));
        assert!(!key.involves(UserId::new(3)));
        assert!(!HistoryKey::group(GroupId::new(1)).involves(UserId::new(1)));
    }

    #[test]
    fn self_conversation_key() {
        let key = HistoryKey::direct(UserId::new(4), UserId::new(4));
        assert_eq!(key.to_string(), "msg_4_4");
    }
}
