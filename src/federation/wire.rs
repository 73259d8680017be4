//! Federation wire protocol — newline-delimited JSON frames.
//!
//! Each line on a peer connection is one [`Frame`]: a tagged envelope
//! `{"type": ..., "payload": {...}}`. Three frame types exist: the
//! periodic full nick list, a relayed private message, and an eager
//! name-change announcement. `is_github_auth` is the preemption flag —
//! an authenticated claim displaces a squatter on the receiving side.

use serde::{Deserialize, Serialize};

/// One federation frame. Serialized as a single JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Frame {
    /// Authoritative local user list of the sender. Fully replaces the
    /// receiver's view of the sender's nicks.
    NickSync { nicks: Vec<String> },

    /// A private message for a user believed to live on the receiver.
    PrivateMessage {
        from: String,
        to: String,
        text: String,
    },

    /// A completed rename on the sender. With `is_github_auth` set, the
    /// receiver must evict any local holder of `new_name`.
    NameChange {
        old_name: String,
        new_name: String,
        is_github_auth: bool,
    },
}

impl Frame {
    /// Serialize to one JSON line (no trailing newline).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from one JSON line.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn nick_sync_round_trip() {
        let frame = Frame::NickSync {
            nicks: vec!["wings".into(), "Anonymous0042".into()],
        };
        let json = frame.to_json().unwrap();
        assert!(json.contains(r#""type":"nick_sync""#));
        assert!(json.contains(r#""nicks":["wings","Anonymous0042"]"#));
        assert_eq!(Frame::from_json(&json).unwrap(), frame);
    }

    #[test]
    fn nick_sync_empty_list() {
        let frame = Frame::NickSync { nicks: vec![] };
        let json = frame.to_json().unwrap();
        assert_eq!(Frame::from_json(&json).unwrap(), frame);
    }

    #[test]
    fn private_message_round_trip() {
        let frame = Frame::PrivateMessage {
            from: "wings".into(),
            to: "driftwood".into(),
            text: "meet me at the sandbar".into(),
        };
        let json = frame.to_json().unwrap();
        assert!(json.contains(r#""type":"private_message""#));
        assert_eq!(Frame::from_json(&json).unwrap(), frame);
    }

    #[test]
    fn name_change_round_trip() {
        let frame = Frame::NameChange {
            old_name: "Anonymous1234".into(),
            new_name: "wings".into(),
            is_github_auth: true,
        };
        let json = frame.to_json().unwrap();
        assert!(json.contains(r#""type":"name_change""#));
        assert!(json.contains(r#""is_github_auth":true"#));
        assert_eq!(Frame::from_json(&json).unwrap(), frame);
    }

    #[test]
    fn wire_shape_matches_protocol() {
        // The envelope layout peers depend on: type tag + payload object.
        let frame = Frame::NameChange {
            old_name: "a".into(),
            new_name: "b".into(),
            is_github_auth: false,
        };
        assert_eq!(
            frame.to_json().unwrap(),
            r#"{"type":"name_change","payload":{"old_name":"a","new_name":"b","is_github_auth":false}}"#
        );
    }

    #[test]
    fn decodes_frames_from_other_implementations() {
        // Field order and whitespace must not matter.
        let json = r#"{ "payload": {"nicks": ["a", "b"]}, "type": "nick_sync" }"#;
        assert_eq!(
            Frame::from_json(json).unwrap(),
            Frame::NickSync {
                nicks: vec!["a".into(), "b".into()]
            }
        );
    }

    #[test]
    fn unknown_type_fails() {
        assert!(Frame::from_json(r#"{"type":"bogus","payload":{}}"#).is_err());
    }

    #[test]
    fn missing_payload_fails() {
        assert!(Frame::from_json(r#"{"type":"nick_sync"}"#).is_err());
    }

    #[test]
    fn missing_type_fails() {
        assert!(Frame::from_json(r#"{"payload":{"nicks":[]}}"#).is_err());
    }
}
