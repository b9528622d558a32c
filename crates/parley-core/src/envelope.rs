//! The decoded message envelope and its wire representation.
//!
//! Clients speak a flat JSON object with PascalCase keys:
//!
//! ```json
//! {"UserId":5,"TargetId":7,"Type":1,"Media":1,"Content":"hi","CreateTime":1718000000}
//! ```
//!
//! `Type` selects routing (`1` direct, `2` group, `3` heartbeat). Attachment
//! keys (`Pic`, `Url`, `Desc`, `Amount`) are optional and omitted when empty.

use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;
use crate::frame::Frame;
use crate::ids::{GroupId, UserId};

/// How an envelope is routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// One-to-one message; `TargetId` is a user id.
    Direct,
    /// Group message; `TargetId` is a group id.
    Group,
    /// Liveness ping; never routed or persisted.
    Heartbeat,
}

impl MessageKind {
    /// Wire code for this kind.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Direct => 1,
            Self::Group => 2,
            Self::Heartbeat => 3,
        }
    }

    /// Parse a wire code.
    pub fn from_code(code: i64) -> Result<Self, DecodeError> {
        match code {
            1 => Ok(Self::Direct),
            2 => Ok(Self::Group),
            3 => Ok(Self::Heartbeat),
            other => Err(DecodeError::UnknownKind(other)),
        }
    }

    /// Short label used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Heartbeat => "heartbeat",
        }
    }
}

/// Content type of the message body.
///
/// Unknown codes are preserved so frames from newer clients still route.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum MediaType {
    /// Plain text.
    #[default]
    Text,
    /// Sticker / emoji pack image.
    Sticker,
    /// Voice clip (URL in `Url`).
    Voice,
    /// Picture (URL in `Url` or `Pic`).
    Image,
    /// Any other code.
    Other(i64),
}

impl From<i64> for MediaType {
    fn from(code: i64) -> Self {
        match code {
            1 => Self::Text,
            2 => Self::Sticker,
            3 => Self::Voice,
            4 => Self::Image,
            other => Self::Other(other),
        }
    }
}

impl From<MediaType> for i64 {
    fn from(media: MediaType) -> Self {
        match media {
            MediaType::Text => 1,
            MediaType::Sticker => 2,
            MediaType::Voice => 3,
            MediaType::Image => 4,
            MediaType::Other(code) => code,
        }
    }
}

/// Flat wire shape. Kept private so every `Envelope` carries a valid kind.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct WireEnvelope {
    #[serde(rename = "UserId")]
    user_id: i64,
    #[serde(rename = "TargetId")]
    target_id: i64,
    #[serde(rename = "Type")]
    kind: i64,
    #[serde(rename = "Media")]
    media: i64,
    #[serde(rename = "Content")]
    content: String,
    #[serde(rename = "CreateTime")]
    create_time: u64,
    #[serde(rename = "ReadTime", skip_serializing_if = "is_zero")]
    read_time: u64,
    #[serde(rename = "Pic", skip_serializing_if = "String::is_empty")]
    pic: String,
    #[serde(rename = "Url", skip_serializing_if = "String::is_empty")]
    url: String,
    #[serde(rename = "Desc", skip_serializing_if = "String::is_empty")]
    desc: String,
    #[serde(rename = "Amount", skip_serializing_if = "is_zero_i64")]
    amount: i64,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(v: &u64) -> bool {
    *v == 0
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

/// A decoded chat message. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireEnvelope", into = "WireEnvelope")]
pub struct Envelope {
    sender_id: UserId,
    target_id: i64,
    kind: MessageKind,
    media: MediaType,
    content: String,
    created_at: u64,
    read_at: u64,
    picture: Option<String>,
    url: Option<String>,
    description: Option<String>,
    amount: Option<i64>,
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = DecodeError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        Ok(Self {
            sender_id: UserId::new(wire.user_id),
            target_id: wire.target_id,
            kind: MessageKind::from_code(wire.kind)?,
            media: MediaType::from(wire.media),
            content: wire.content,
            created_at: wire.create_time,
            read_at: wire.read_time,
            picture: non_empty(wire.pic),
            url: non_empty(wire.url),
            description: non_empty(wire.desc),
            amount: (wire.amount != 0).then_some(wire.amount),
        })
    }
}

impl From<Envelope> for WireEnvelope {
    fn from(env: Envelope) -> Self {
        Self {
            user_id: env.sender_id.get(),
            target_id: env.target_id,
            kind: env.kind.code(),
            media: env.media.into(),
            content: env.content,
            create_time: env.created_at,
            read_time: env.read_at,
            pic: env.picture.unwrap_or_default(),
            url: env.url.unwrap_or_default(),
            desc: env.description.unwrap_or_default(),
            amount: env.amount.unwrap_or_default(),
        }
    }
}

impl Envelope {
    fn new(sender: UserId, target_id: i64, kind: MessageKind, content: String) -> Self {
        Self {
            sender_id: sender,
            target_id,
            kind,
            media: MediaType::Text,
            content,
            created_at: 0,
            read_at: 0,
            picture: None,
            url: None,
            description: None,
            amount: None,
        }
    }

    /// A one-to-one text message.
    #[must_use]
    pub fn direct(sender: UserId, target: UserId, content: impl Into<String>) -> Self {
        Self::new(sender, target.get(), MessageKind::Direct, content.into())
    }

    /// A group text message.
    #[must_use]
    pub fn group(sender: UserId, group: GroupId, content: impl Into<String>) -> Self {
        Self::new(sender, group.get(), MessageKind::Group, content.into())
    }

    /// A heartbeat from `sender`.
    #[must_use]
    pub fn heartbeat(sender: UserId) -> Self {
        Self::new(sender, 0, MessageKind::Heartbeat, String::new())
    }

    /// Set the media type.
    #[must_use]
    pub fn with_media(mut self, media: MediaType) -> Self {
        self.media = media;
        self
    }

    /// Set the creation timestamp (unix seconds).
    #[must_use]
    pub fn with_created_at(mut self, unix_secs: u64) -> Self {
        self.created_at = unix_secs;
        self
    }

    /// Attach a picture reference.
    #[must_use]
    pub fn with_picture(mut self, picture: impl Into<String>) -> Self {
        self.picture = non_empty(picture.into());
        self
    }

    /// Attach a URL (voice clip, image, file).
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = non_empty(url.into());
        self
    }

    /// Attach a free-form description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = non_empty(description.into());
        self
    }

    /// Attach a numeric amount (e.g. voice clip length).
    #[must_use]
    pub fn with_amount(mut self, amount: i64) -> Self {
        self.amount = (amount != 0).then_some(amount);
        self
    }

    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let wire: WireEnvelope = serde_json::from_str(text)?;
        Self::try_from(wire)
    }

    /// Decode a raw frame.
    pub fn decode_frame(frame: &Frame) -> Result<Self, DecodeError> {
        Self::decode(frame.as_str())
    }

    /// Encode into a wire frame.
    pub fn encode(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }

    /// Sender of the message.
    pub fn sender_id(&self) -> UserId {
        self.sender_id
    }

    /// Raw target id; interpret with [`Self::target_user`] or [`Self::target_group`].
    pub fn target_id(&self) -> i64 {
        self.target_id
    }

    /// Target as a user id.
    pub fn target_user(&self) -> UserId {
        UserId::new(self.target_id)
    }

    /// Target as a group id.
    pub fn target_group(&self) -> GroupId {
        GroupId::new(self.target_id)
    }

    /// Routing kind.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Whether this is a heartbeat frame.
    pub fn is_heartbeat(&self) -> bool {
        self.kind == MessageKind::Heartbeat
    }

    /// Media type of the body.
    pub fn media(&self) -> MediaType {
        self.media
    }

    /// Message body.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Creation time (unix seconds, `0` if the client did not set it).
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Read receipt time (unix seconds, `0` if unread).
    pub fn read_at(&self) -> u64 {
        self.read_at
    }

    /// Picture attachment.
    pub fn picture(&self) -> Option<&str> {
        self.picture.as_deref()
    }

    /// URL attachment.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Description attachment.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Numeric attachment.
    pub fn amount(&self) -> Option<i64> {
        self.amount
    }
}
