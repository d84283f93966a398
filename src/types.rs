/// Shared types used across the codebase

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operations that flow through the mutation pipeline and observer rings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Set,
    Update,
    Delete,
    Select,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Set => "set",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Select => "select",
        }
    }
}

/// Entity kind discriminator. Tag + tenant scope defines the logical "table".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Tag {
    Group,
    App,
    ClientToken,
    Member,
    Log,
    Monitor,
    Callback,
    Room,
    RoomSubscription,
    AuthId,
    ConnectedSocket,
    Obj,
}

impl Tag {
    pub const ALL: [Tag; 12] = [
        Tag::Group,
        Tag::App,
        Tag::ClientToken,
        Tag::Member,
        Tag::Log,
        Tag::Monitor,
        Tag::Callback,
        Tag::Room,
        Tag::RoomSubscription,
        Tag::AuthId,
        Tag::ConnectedSocket,
        Tag::Obj,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Group => "group",
            Tag::App => "app",
            Tag::ClientToken => "clientToken",
            Tag::Member => "member",
            Tag::Log => "log",
            Tag::Monitor => "monitor",
            Tag::Callback => "callback",
            Tag::Room => "room",
            Tag::RoomSubscription => "roomSubscription",
            Tag::AuthId => "authId",
            Tag::ConnectedSocket => "connectedSocket",
            Tag::Obj => "obj",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tag::ALL
            .iter()
            .copied()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| format!("Unknown tag: {}", s))
    }
}

/// How `updateMany` applies its update to the `data` block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateMode {
    /// Deep-merge update fields into the existing data
    #[default]
    Merge,
    /// Replace the data block wholesale
    Replace,
}

/// What `setMany` does when an item's unique fields match a live object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnConflict {
    /// Reject the whole batch with a conflict error
    #[default]
    Fail,
    /// Replace the existing object's data in place
    Replace,
    /// Deep-merge the item into the existing object's data
    Merge,
    /// Keep the existing object untouched and return it
    Ignore,
}

/// Kind of actor performing a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActorType {
    User,
    ClientToken,
    System,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::User => "user",
            ActorType::ClientToken => "clientToken",
            ActorType::System => "system",
        }
    }
}

impl FromStr for ActorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ActorType::User),
            "clientToken" => Ok(ActorType::ClientToken),
            "system" => Ok(ActorType::System),
            other => Err(format!("Unknown actor type: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_names_round_trip_through_from_str() {
        for tag in Tag::ALL {
            assert_eq!(tag.as_str().parse::<Tag>().unwrap(), tag);
            let json = serde_json::to_value(tag).unwrap();
            assert_eq!(json, serde_json::Value::String(tag.as_str().to_string()));
        }
        assert!("widget".parse::<Tag>().is_err());
    }

    #[test]
    fn defaults_are_merge_and_fail() {
        assert_eq!(UpdateMode::default(), UpdateMode::Merge);
        assert_eq!(OnConflict::default(), OnConflict::Fail);
    }
}
