//! Turns an inbound chat message into what gets broadcast.

use yep_protocol::{Level, ServerMessage, UserId};

use crate::{LevelPolicy, PolicyError};

/// The sending session's identity, as far as message formatting cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub user_id: UserId,
    pub contact: String,
    pub level: Level,
}

/// Result of [`process`].
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    /// Deliver to everyone but the author.
    Broadcast(ServerMessage),
    /// Send `reply` to the author only.
    Rejected {
        reply: ServerMessage,
        error: PolicyError,
    },
}

/// Applies the level policy and formats the outgoing message.
///
/// Length is the UTF-8 byte length of `content`.
pub fn process(content: &str, author: &Author, policy: &LevelPolicy, now: i64) -> Processed {
    if let Some(max) = policy.max_len(author.level) {
        let actual = content.len();
        if actual > max {
            let error = PolicyError::TooLong {
                level: author.level,
                max,
                actual,
            };
            return Processed::Rejected {
                reply: ServerMessage::error(error.to_string()),
                error,
            };
        }
    }

    Processed::Broadcast(ServerMessage::Message {
        content: format!("[{} | Level {}] {}", author.contact, author.level, content),
        yui: author.user_id.clone(),
        level: author.level,
        timestamp: now,
    })
}
