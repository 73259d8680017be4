/// Chat message values.
///
/// A [`Message`] is constructed once at event ingress (a session submitting
/// a line, the hub emitting a notice, a federation frame arriving) and then
/// flows through client outbound queues unchanged.

/// Who a message is from and what it says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Display name of the author (`"System"` for notices).
    pub author: String,
    /// Message body.
    pub content: String,
    pub kind: MessageKind,
    /// True if the author held a GitHub-verified name when sending.
    pub author_is_authed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Public,
    Private,
    System,
}

impl Message {
    /// A system notice. Author is always `System`.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            author: "System".into(),
            content: content.into(),
            kind: MessageKind::System,
            author_is_authed: false,
        }
    }

    /// A public room message.
    pub fn public(author: impl Into<String>, content: impl Into<String>, authed: bool) -> Self {
        Self {
            author: author.into(),
            content: content.into(),
            kind: MessageKind::Public,
            author_is_authed: authed,
        }
    }

    /// A private (whisper) message.
    pub fn private(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            content: content.into(),
            kind: MessageKind::Private,
            author_is_authed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_come_from_system() {
        let msg = Message::system("maintenance at noon");
        assert_eq!(msg.author, "System");
        assert_eq!(msg.kind, MessageKind::System);
        assert!(!msg.author_is_authed);
    }

    #[test]
    fn public_message_carries_auth_flag() {
        let msg = Message::public("wings", "hello", true);
        assert_eq!(msg.kind, MessageKind::Public);
        assert!(msg.author_is_authed);
    }
}
